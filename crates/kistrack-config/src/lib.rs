//! Configuration for kistrack.
//!
//! TOML profiles naming a Kismet server plus reconnect tuning, merged
//! with `KISTRACK_`-prefixed environment variables, and translation to
//! `kistrack_core::SessionConfig`. The CLI layers its flags on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kistrack_core::{DEFAULT_SERVER, ReconnectConfig, SessionConfig};

/// Prefix for environment overrides. Nested keys are separated by `__`,
/// e.g. `KISTRACK_PROFILES__LAB__SERVER`.
pub const ENV_PREFIX: &str = "KISTRACK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is given on the command line.
    pub default_profile: Option<String>,

    /// Values used by any profile that leaves them unset.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Seconds to wait for a TCP connect.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds between summaries printed by `watch`.
    #[serde(default = "default_summary_interval")]
    pub summary_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            summary_interval: default_summary_interval(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_summary_interval() -> u64 {
    5
}
fn default_server() -> String {
    DEFAULT_SERVER.into()
}

/// A named server profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Kismet server as `host:port`.
    #[serde(default = "default_server")]
    pub server: String,

    /// Override the connect timeout (seconds).
    pub connect_timeout: Option<u64>,

    /// First reconnect delay (milliseconds).
    pub reconnect_initial_ms: Option<u64>,

    /// Upper bound on the reconnect delay (milliseconds).
    pub reconnect_max_ms: Option<u64>,

    /// Give up after this many failed reconnects. Unset retries forever.
    pub max_retries: Option<u32>,

    /// Override the `watch` summary interval (seconds).
    pub summary_interval: Option<u64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            server: default_server(),
            connect_timeout: None,
            reconnect_initial_ms: None,
            reconnect_max_ms: None,
            max_retries: None,
            summary_interval: None,
        }
    }
}

impl Profile {
    /// Summary interval for this profile, falling back to `defaults`.
    pub fn summary_interval(&self, defaults: &Defaults) -> Duration {
        Duration::from_secs(self.summary_interval.unwrap_or(defaults.summary_interval).max(1))
    }
}

impl Config {
    /// Pick a profile: `name` if given, else `default_profile`, else
    /// `"default"`. A missing `"default"` profile resolves to the built-in
    /// local server; any other missing name is an error.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile.clone())),
            None if name == "default" => Ok((name, Profile::default())),
            None => Err(ConfigError::UnknownProfile { profile: name }),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "kistrack", "kistrack").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("kistrack");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path` (if present), then environment.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core ─────────────────────────────────────────────

/// Check that `server` looks like `host:port`.
pub fn validate_server(server: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Validation {
        field: "server".into(),
        reason: format!("{reason}: '{server}'"),
    };

    let (host, port) = server.rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(invalid("invalid port")),
    }
}

/// Build a `SessionConfig` from a profile.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    validate_server(&profile.server)?;

    let timeout_secs = profile.connect_timeout.unwrap_or(defaults.connect_timeout);
    if timeout_secs == 0 {
        return Err(ConfigError::Validation {
            field: "connect_timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let base = ReconnectConfig::default();
    let reconnect = ReconnectConfig {
        initial_delay: profile
            .reconnect_initial_ms
            .map_or(base.initial_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_ms
            .map_or(base.max_delay, Duration::from_millis),
        max_retries: profile.max_retries,
    };
    if reconnect.initial_delay > reconnect.max_delay {
        return Err(ConfigError::Validation {
            field: "reconnect_initial_ms".into(),
            reason: format!(
                "initial delay {}ms exceeds maximum {}ms",
                reconnect.initial_delay.as_millis(),
                reconnect.max_delay.as_millis()
            ),
        });
    }

    Ok(SessionConfig {
        server: profile.server.clone(),
        connect_timeout: Duration::from_secs(timeout_secs),
        reconnect,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
