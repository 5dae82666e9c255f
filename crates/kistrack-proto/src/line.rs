//! Server sentence framing.
//!
//! Every line the server sends has the shape `*NAME: field field ...`.
//! Fields are separated by spaces; a field that itself contains spaces is
//! wrapped in `\x01` delimiters (`\x01two words\x01`).

use crate::error::Error;

/// Delimiter wrapping fields that contain whitespace.
pub const FIELD_QUOTE: char = '\x01';

/// A single tokenized server sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLine {
    /// Protocol name, e.g. `"PHYMAP"`.
    pub protocol: String,
    /// Positional fields, in the order the server sent them.
    pub fields: Vec<String>,
}

impl ServerLine {
    /// Parse a raw line (without its trailing newline).
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let line = raw.trim_end_matches(['\r', '\n']);

        let Some(rest) = line.strip_prefix('*') else {
            return Err(malformed(line, "missing '*' prefix"));
        };
        let Some((protocol, body)) = rest.split_once(':') else {
            return Err(malformed(line, "missing ':' after protocol name"));
        };
        if protocol.is_empty() || protocol.contains(char::is_whitespace) {
            return Err(malformed(line, "invalid protocol name"));
        }

        let fields = tokenize(body).ok_or_else(|| malformed(line, "unterminated quoted field"))?;

        Ok(Self {
            protocol: protocol.to_owned(),
            fields,
        })
    }
}

/// Split a sentence body into fields. Returns `None` on an unterminated
/// quoted field.
pub fn tokenize(body: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ' ').is_some() {}

        match chars.peek() {
            None => break,
            Some(&FIELD_QUOTE) => {
                chars.next();
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some(FIELD_QUOTE) => break,
                        Some(c) => field.push(c),
                        None => return None,
                    }
                }
                fields.push(field);
            }
            Some(_) => {
                let mut field = String::new();
                while let Some(c) = chars.next_if(|c| *c != ' ') {
                    field.push(c);
                }
                fields.push(field);
            }
        }
    }

    Some(fields)
}

/// Format a client command: `!<id> <VERB> <args>`.
pub fn format_command(id: u32, verb: &str, args: &str) -> String {
    if args.is_empty() {
        format!("!{id} {verb}")
    } else {
        format!("!{id} {verb} {args}")
    }
}

fn malformed(line: &str, reason: &'static str) -> Error {
    Error::MalformedLine {
        line: line.to_owned(),
        reason,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_fields() {
        let line = ServerLine::parse("*PHYMAP: 1 802.11 100 80 5 2 10").unwrap();
        assert_eq!(line.protocol, "PHYMAP");
        assert_eq!(
            line.fields,
            vec!["1", "802.11", "100", "80", "5", "2", "10"]
        );
    }

    #[test]
    fn parses_quoted_field_with_spaces() {
        let line = ServerLine::parse("*PHYMAP: 2 \x01IEEE 802.15.4\x01 0 0 0 0 0").unwrap();
        assert_eq!(line.fields[1], "IEEE 802.15.4");
        assert_eq!(line.fields.len(), 7);
    }

    #[test]
    fn empty_quoted_field_is_kept() {
        let line = ServerLine::parse("*ACK: 3 \x01\x01").unwrap();
        assert_eq!(line.fields, vec!["3", ""]);
    }

    #[test]
    fn collapses_repeated_spaces_and_trims_newline() {
        let line = ServerLine::parse("*TIME:   1700000000  \r\n").unwrap();
        assert_eq!(line.protocol, "TIME");
        assert_eq!(line.fields, vec!["1700000000"]);
    }

    #[test]
    fn empty_body_yields_no_fields() {
        let line = ServerLine::parse("*DEVICE:").unwrap();
        assert!(line.fields.is_empty());
    }

    #[test]
    fn rejects_missing_star() {
        let err = ServerLine::parse("PHYMAP: 1").unwrap_err();
        assert!(matches!(err, Error::MalformedLine { reason: "missing '*' prefix", .. }));
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(ServerLine::parse("*PHYMAP 1 2").is_err());
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = ServerLine::parse("*PHYMAP: 1 \x01open").unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedLine {
                reason: "unterminated quoted field",
                ..
            }
        ));
    }

    #[test]
    fn formats_commands() {
        assert_eq!(format_command(4, "CAPABILITY", "PHYMAP"), "!4 CAPABILITY PHYMAP");
        assert_eq!(format_command(5, "ENABLE", "PHYMAP phyid,phyname"), "!5 ENABLE PHYMAP phyid,phyname");
        assert_eq!(format_command(6, "SHUTDOWN", ""), "!6 SHUTDOWN");
    }
}
