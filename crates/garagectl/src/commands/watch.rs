//! Watch: keep the controller running and stream activity until Ctrl-C.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use garage_core::{Activity, ActivityKind, ChannelStatus, ConnectionState, Controller, DeviceId};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::Connection;
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(
    connection: Connection,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = Controller::new(connection.config, connection.session)?;
    // Subscribe before connecting so the initial refresh shows up too.
    let activity = controller.activity();
    controller.connect().await?;

    let result = stream(&controller, activity, &args, global).await;
    controller.shutdown().await;
    result
}

async fn stream(
    controller: &Controller,
    mut activity: tokio::sync::broadcast::Receiver<Arc<Activity>>,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let filter = args
        .garage
        .as_deref()
        .map(|g| controller.resolve_device(Some(g)))
        .transpose()?;

    for device in controller.devices_snapshot().iter() {
        if filter.as_ref().is_some_and(|f| *f != device.id) {
            continue;
        }
        let out = output::render_event(&global.output, device.as_ref(), |d| {
            format!(
                "{} {} is {}",
                util::local_time(Some(chrono::Utc::now())),
                d.name,
                output::door_label(d.door, color)
            )
        });
        output::print_output(&out, global.quiet);
    }

    let mut connection_state = controller.connection_state();
    let mut channel = controller.watch_channel_status().filter(|_| args.connection);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupted, stopping watch");
                return Ok(());
            }
            event = activity.recv() => match event {
                Ok(event) => {
                    if filter.is_some() && event.device_id != filter {
                        continue;
                    }
                    let out = output::render_event(&global.output, event.as_ref(), |a| {
                        describe(controller, a, color)
                    });
                    output::print_output(&out, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "activity feed lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = connection_state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = connection_state.borrow_and_update().clone();
                if state == ConnectionState::SessionExpired {
                    return Err(CliError::SessionExpired { profile: String::new() });
                }
            }
            Some(status) = next_channel_status(&mut channel) => {
                let out = output::render_event(&global.output, &status, channel_line);
                output::print_output(&out, global.quiet);
            }
        }
    }
}

/// Next push stream status change; pending forever when not watched.
async fn next_channel_status(
    rx: &mut Option<tokio::sync::watch::Receiver<ChannelStatus>>,
) -> Option<ChannelStatus> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

fn channel_line(status: &ChannelStatus) -> String {
    let now = util::local_time(Some(chrono::Utc::now()));
    match (status.connected, &status.last_error) {
        (true, _) => format!("{now} push stream connected"),
        (false, Some(err)) => format!(
            "{now} push stream down ({err}), retry {}",
            status.reconnect_attempts
        ),
        (false, None) => format!("{now} push stream disconnected"),
    }
}

fn describe(controller: &Controller, activity: &Activity, color: bool) -> String {
    let name = activity
        .device_id
        .as_ref()
        .map_or_else(|| "backend".to_owned(), |id| display_name(controller, id));
    let what = match &activity.kind {
        ActivityKind::DoorChanged { from, to } => format!(
            "{} -> {}",
            output::door_label(*from, color),
            output::door_label(*to, color)
        ),
        ActivityKind::TransitionStarted { action } => format!("{action} requested"),
        ActivityKind::TransitionCompleted { state } => {
            format!("is {}", output::door_label(*state, color))
        }
        ActivityKind::TransitionReverted { state, reason } => format!(
            "reverted to {} ({reason})",
            output::door_label(*state, color)
        ),
        ActivityKind::CommandRelayed { action: Some(action) } => format!("{action} relayed"),
        ActivityKind::CommandRelayed { action: None } => "command relayed".into(),
        ActivityKind::BackendError { message } => format!("error: {message}"),
    };
    format!("{} {name} {what}", util::local_time(Some(activity.at)))
}

fn display_name(controller: &Controller, id: &DeviceId) -> String {
    controller
        .store()
        .device_by_id(id)
        .map_or_else(|| id.to_string(), |d| d.name.clone())
}
