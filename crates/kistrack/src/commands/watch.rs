//! `watch`: run a live session and print a summary every interval.

use std::time::Duration;

use kistrack_core::{Session, SessionState};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let interval = args
        .interval
        .map_or(resolved.summary_interval, Duration::from_secs);
    if interval.is_zero() {
        return Err(CliError::Validation {
            field: "interval".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    info!(profile = %resolved.name, server = %resolved.session.server, "watching");
    let session = Session::new(resolved.session);
    session.start().await?;

    let result = watch_loop(&session, interval, global).await;
    session.shutdown().await;

    if result.is_ok() {
        print_summary(&session, global)?;
    }
    result
}

async fn watch_loop(
    session: &Session,
    interval: Duration,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let mut state = session.state();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing is subscribed yet.
    ticker.tick().await;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            res = &mut interrupted => {
                res?;
                info!("interrupted");
                return Ok(());
            }
            _ = ticker.tick() => {
                if session.current_state() == SessionState::Configured {
                    print_summary(session, global)?;
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *state.borrow_and_update();
                report_state(session, current, global.quiet, color);
                if current == SessionState::Failed {
                    return Err(CliError::session_failed(
                        &session.config().server,
                        session.failure(),
                    ));
                }
            }
        }
    }
}

fn print_summary(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let rendered = output::render_summary(global.output, &session.tracker().summary())?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn report_state(session: &Session, state: SessionState, quiet: bool, color: bool) {
    if quiet {
        return;
    }
    let server = session.config().server.as_str();
    let line = match state {
        SessionState::Connecting => output::status_line("connecting", server, true, color),
        SessionState::Connected => {
            let name = session
                .server_info()
                .and_then(|info| info.server_name)
                .unwrap_or_else(|| server.to_owned());
            output::status_line("connected", &name, true, color)
        }
        SessionState::Configured => output::status_line("subscribed", "PHYMAP", true, color),
        SessionState::Disconnected => output::status_line("disconnected", server, false, color),
        SessionState::Failed => output::status_line("failed", server, false, color),
    };
    eprintln!("{line}");
}
