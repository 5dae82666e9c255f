//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a process exit code.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use kistrack_config::ConfigError;
use kistrack_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const INCOMPATIBLE: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to server at {server}: {reason}")]
    #[diagnostic(
        code(kistrack::connection_failed),
        help(
            "Check that kismet_server is running and listening on {server}.\n\
             Override the address with --server host:port"
        )
    )]
    ConnectionFailed { server: String, reason: String },

    #[error("Gave up on server {server}")]
    #[diagnostic(
        code(kistrack::session_failed),
        help(
            "The server rejected the PHYMAP subscription, or the link dropped and\n\
             could not be re-established. Run with -v to see why, or raise\n\
             max_retries in your profile."
        )
    )]
    SessionFailed { server: String },

    #[error("Connection timed out after {seconds}s")]
    #[diagnostic(
        code(kistrack::timeout),
        help("Increase connect_timeout in your profile or check the server is reachable.")
    )]
    Timeout { seconds: u64 },

    // ── Server dialect ───────────────────────────────────────────────

    #[error("Server is incompatible: {protocol} {reason}")]
    #[diagnostic(
        code(kistrack::incompatible_server),
        help("kistrack needs a server that offers the PHYMAP protocol with every counter field.")
    )]
    IncompatibleServer { protocol: String, reason: String },

    #[error("Operation '{operation}' is not supported: {reason}")]
    #[diagnostic(code(kistrack::unsupported))]
    Unsupported { operation: String, reason: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(kistrack::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(kistrack::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(kistrack::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Profiles live in {path}"
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(kistrack::config))]
    Config { message: String },

    // ── Replay ───────────────────────────────────────────────────────

    #[error("Cannot read capture file {}", path.display())]
    #[diagnostic(
        code(kistrack::capture_unreadable),
        help("Pass a file with one server sentence per line, or `-` to read stdin.")
    )]
    CaptureRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(kistrack::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(kistrack::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::SessionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::IncompatibleServer { .. } => exit_code::INCOMPATIBLE,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl CliError {
    /// Error for a session that entered the failed state, preferring the
    /// recorded cause. A plain dropped link carries no detail worth more
    /// than the generic message.
    pub fn session_failed(server: &str, cause: Option<CoreError>) -> Self {
        match cause {
            None | Some(CoreError::Disconnected) => CliError::SessionFailed {
                server: server.to_owned(),
            },
            Some(cause) => cause.into(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { addr, reason } => CliError::ConnectionFailed {
                server: addr,
                reason,
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::Disconnected => CliError::ConnectionFailed {
                server: "(disconnected)".into(),
                reason: "server connection was lost".into(),
            },

            CoreError::IncompatibleServer { protocol, reason } => {
                CliError::IncompatibleServer { protocol, reason }
            }

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
            },

            CoreError::Unsupported { operation, reason } => {
                CliError::Unsupported { operation, reason }
            }

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
                path: kistrack_config::config_path().display().to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
