//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod config_cmd;
pub mod door;
pub mod login;
pub mod logs;
pub mod status;
pub mod util;
pub mod watch;

use garage_core::DoorAction;

use crate::cli::{Command, GlobalOpts};
use crate::config::Connection;
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    connection: Connection,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Status(args) => status::handle(connection, args, global).await,
        Command::Open(args) => door::handle(connection, DoorAction::Open, args, global).await,
        Command::Close(args) => door::handle(connection, DoorAction::Close, args, global).await,
        Command::Watch(args) => watch::handle(connection, args, global).await,
        Command::Logs(args) => logs::handle(connection, args, global).await,
        // Handled before a connection is resolved
        Command::Login(_) | Command::Logout | Command::Config(_) | Command::Completions(_) => Err(
            CliError::Internal("command does not take a backend connection".into()),
        ),
    }
}
