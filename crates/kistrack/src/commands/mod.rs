//! Command dispatch: bridges CLI args -> tracker -> output formatting.

pub mod replay;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a tracking command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(&args, global).await,
        Command::Replay(args) => replay::handle(&args, global),
        // Completions are handled before dispatch
        Command::Completions(_) => Err(CliError::Internal(
            "completions reached the command dispatcher".into(),
        )),
    }
}
