use thiserror::Error;

/// Top-level error type for the `kistrack-proto` crate.
///
/// Covers connection setup, line framing, and protocol negotiation.
/// `kistrack-core` maps these into tracker-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// TCP connect failed (refused, unreachable, DNS failure, etc.)
    #[error("Cannot connect to server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect attempt did not complete in time.
    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Socket error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error (line too long, invalid UTF-8, underlying I/O).
    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// No connection is currently established.
    #[error("Not connected to a server")]
    NotConnected,

    /// The server hung up.
    #[error("Server closed the connection")]
    Closed,

    /// The connection was deliberately terminated by a client callback.
    #[error("Connection killed by client")]
    Killed,

    // ── Protocol ────────────────────────────────────────────────────
    /// A server line that does not follow `*NAME: fields` framing.
    #[error("Malformed server line ({reason}): {line:?}")]
    MalformedLine { line: String, reason: &'static str },

    /// The server never announced this protocol.
    #[error("Server does not support protocol {protocol}")]
    UnsupportedProtocol { protocol: String },

    /// The server announced the protocol but not this field.
    #[error("Server protocol {protocol} has no field '{field}'")]
    UnsupportedField { protocol: String, field: String },
}

impl Error {
    /// Whether the error means the server speaks an incompatible dialect,
    /// as opposed to a transient transport failure.
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProtocol { .. } | Self::UnsupportedField { .. }
        )
    }
}
