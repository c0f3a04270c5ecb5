//! Access log listing.

use tabled::Tabled;

use garage_core::{AccessLogEntry, Controller};

use crate::cli::{GlobalOpts, LogsArgs};
use crate::config::Connection;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl LogRow {
    fn new(e: &AccessLogEntry) -> Self {
        Self {
            timestamp: e.timestamp.clone(),
            user: e.user.clone(),
            action: e.action.clone(),
        }
    }
}

pub async fn handle(
    connection: Connection,
    args: LogsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let entries = Controller::oneshot(connection.config, connection.session, |ctrl| async move {
        ctrl.access_logs().await
    })
    .await?;

    let entries = newest_first(entries, args.limit);
    let out = output::render_list(
        &global.output,
        &entries,
        LogRow::new,
        |e| format!("{}\t{}\t{}", e.timestamp, e.user, e.action),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

/// The backend returns oldest first; keep the last `limit`, newest on top.
fn newest_first(mut entries: Vec<AccessLogEntry>, limit: usize) -> Vec<AccessLogEntry> {
    let skip = entries.len().saturating_sub(limit);
    entries.drain(..skip);
    entries.reverse();
    entries
}
