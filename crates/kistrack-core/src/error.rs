// ── Core error types ──
//
// User-facing errors from kistrack-core. Transport failures from
// kistrack-proto are translated into tracker-level variants by the
// `From<kistrack_proto::Error>` impl below.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to server at {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Server connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Server disconnected")]
    Disconnected,

    #[error("Server is incompatible: cannot stream {protocol} ({reason})")]
    IncompatibleServer { protocol: String, reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {operation} ({reason})")]
    Unsupported { operation: String, reason: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<kistrack_proto::Error> for CoreError {
    fn from(err: kistrack_proto::Error) -> Self {
        match err {
            kistrack_proto::Error::Connect { addr, source } => CoreError::ConnectionFailed {
                addr,
                reason: source.to_string(),
            },
            kistrack_proto::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            kistrack_proto::Error::Io(_)
            | kistrack_proto::Error::NotConnected
            | kistrack_proto::Error::Closed
            | kistrack_proto::Error::Killed => CoreError::Disconnected,
            kistrack_proto::Error::Codec(e) => CoreError::Internal(format!("Line framing error: {e}")),
            kistrack_proto::Error::MalformedLine { line, reason } => {
                CoreError::Internal(format!("Malformed server line ({reason}): {line:?}"))
            }
            kistrack_proto::Error::UnsupportedProtocol { protocol } => {
                CoreError::IncompatibleServer {
                    protocol,
                    reason: "protocol not offered".into(),
                }
            }
            kistrack_proto::Error::UnsupportedField { protocol, field } => {
                CoreError::IncompatibleServer {
                    protocol,
                    reason: format!("field '{field}' not offered"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_protocol_errors_map_to_incompatible_server() {
        let err = CoreError::from(kistrack_proto::Error::UnsupportedField {
            protocol: "PHYMAP".into(),
            field: "packetrate".into(),
        });
        assert_eq!(
            err.to_string(),
            "Server is incompatible: cannot stream PHYMAP (field 'packetrate' not offered)"
        );
    }

    #[test]
    fn dropped_links_map_to_disconnected() {
        assert!(matches!(
            CoreError::from(kistrack_proto::Error::Killed),
            CoreError::Disconnected
        ));
        assert!(matches!(
            CoreError::from(kistrack_proto::Error::NotConnected),
            CoreError::Disconnected
        ));
        assert!(matches!(
            CoreError::from(kistrack_proto::Error::Closed),
            CoreError::Disconnected
        ));
    }

    #[test]
    fn connect_failures_keep_address_and_cause() {
        let err = CoreError::from(kistrack_proto::Error::Connect {
            addr: "10.0.0.5:2501".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        match err {
            CoreError::ConnectionFailed { addr, reason } => {
                assert_eq!(addr, "10.0.0.5:2501");
                assert!(reason.contains("refused"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
