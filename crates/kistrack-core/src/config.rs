// ── Runtime session configuration ──
//
// Describes *where* the tracker's server lives and how hard to try to
// stay connected. Never touches disk: the CLI builds a `SessionConfig`
// from its profile and hands it in.

use std::time::Duration;

use kistrack_proto::{ClientConfig, ReconnectConfig};

/// Default Kismet server port on the local host.
pub const DEFAULT_SERVER: &str = "localhost:2501";

/// Configuration for one tracking session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Server address as `host:port`.
    pub server: String,
    /// Connect timeout for a single attempt.
    pub connect_timeout: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.into(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub(crate) fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.server.clone(),
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_carries_every_setting() {
        let mut config = SessionConfig::new("10.0.0.5:2501");
        config.connect_timeout = Duration::from_secs(3);
        config.reconnect.max_retries = Some(4);

        let client = config.to_client_config();
        assert_eq!(client.addr, "10.0.0.5:2501");
        assert_eq!(client.connect_timeout, Duration::from_secs(3));
        assert_eq!(client.reconnect.max_retries, Some(4));
    }
}
