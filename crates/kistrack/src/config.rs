//! Profile resolution for the CLI: config file, then global flags.

use std::time::Duration;

use kistrack_config::Config;
use kistrack_core::SessionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything `watch` needs to run one session.
#[derive(Debug)]
pub struct ResolvedProfile {
    pub name: String,
    pub session: SessionConfig,
    pub summary_interval: Duration,
}

/// Load the config file and apply `--profile` / `--server` on top.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let cfg = kistrack_config::load_config()?;
    resolve_from(&cfg, global)
}

fn resolve_from(cfg: &Config, global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let (name, mut profile) = cfg
        .resolve_profile(global.profile.as_deref())
        .map_err(|err| match CliError::from(err) {
            CliError::ProfileNotFound { name, path, .. } => CliError::ProfileNotFound {
                name,
                available: available_profiles(cfg),
                path,
            },
            other => other,
        })?;

    if let Some(server) = &global.server {
        profile.server.clone_from(server);
    }

    let session = kistrack_config::profile_to_session_config(&profile, &cfg.defaults)?;
    tracing::debug!(profile = %name, server = %session.server, "resolved profile");

    Ok(ResolvedProfile {
        summary_interval: profile.summary_interval(&cfg.defaults),
        name,
        session,
    })
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}
