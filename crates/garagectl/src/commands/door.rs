//! Open / close: dispatch the command, then follow the door animation.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use garage_core::{Controller, Coordinates, DeviceId, DoorAction, TransitionTicket};

use crate::cli::{DoorArgs, GlobalOpts};
use crate::config::Connection;
use crate::error::CliError;
use crate::output;

use super::util;

/// How long to wait for the push stream before sending over the direct path alone.
const PUSH_GRACE: Duration = Duration::from_secs(2);
const TICK: Duration = Duration::from_millis(100);

pub async fn handle(
    mut connection: Connection,
    action: DoorAction,
    args: DoorArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        connection.config.location = Some(Coordinates {
            latitude,
            longitude,
        });
    }
    // The local timer settles the door; no need to poll while it runs.
    connection.config.poll_interval = Duration::ZERO;

    let controller = Controller::new(connection.config, connection.session)?;
    controller.connect().await?;
    let result = run(&controller, action, &args, global).await;
    controller.shutdown().await;
    result
}

async fn run(
    controller: &Controller,
    action: DoorAction,
    args: &DoorArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let device = controller.resolve_device(args.garage.as_deref())?;
    wait_for_push(controller).await;

    let ticket = controller.request_transition(&device, action).await?;
    if !global.quiet {
        match &ticket.message {
            Some(message) => eprintln!("{action} acknowledged: {message}"),
            None => eprintln!("{action} acknowledged"),
        }
    }
    if args.no_wait {
        return Ok(());
    }

    follow(controller, &device, &ticket, global.quiet).await;

    if let Some(d) = controller.store().device_by_id(&device) {
        let color = output::should_color(&global.color);
        let out = output::render_single(
            &global.output,
            d.as_ref(),
            |d| util::device_detail(d, &output::door_label(d.door, color)),
            |d| d.door.to_string(),
        );
        output::print_output(&out, global.quiet);
    }
    Ok(())
}

/// Give the push stream a moment so the command goes out on both paths.
async fn wait_for_push(controller: &Controller) {
    let Some(mut status) = controller.watch_channel_status() else {
        return;
    };
    if tokio::time::timeout(PUSH_GRACE, status.wait_for(|s| s.connected))
        .await
        .is_err()
    {
        tracing::info!("push stream not connected, sending over the direct path only");
    }
}

/// Draw the door's travel until the transition settles.
async fn follow(controller: &Controller, device: &DeviceId, ticket: &TransitionTicket, quiet: bool) {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:>8} [{bar:30}] {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(controller.door_state(device).map(|s| s.to_string()).unwrap_or_default());

    let mut ticker = tokio::time::interval(TICK);
    while controller.is_in_flight(device) {
        ticker.tick().await;
        if let Some(progress) = controller.progress(device) {
            bar.set_position(percent(progress));
        }
    }

    let settled = controller.door_state(device);
    if settled == Some(ticket.target) {
        bar.set_position(100);
    }
    bar.finish_with_message(settled.map(|s| s.to_string()).unwrap_or_default());
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn percent(progress: f64) -> u64 {
    (progress.clamp(0.0, 1.0) * 100.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::percent;

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent(0.5), 50);
        assert_eq!(percent(1.7), 100);
        assert_eq!(percent(-0.2), 0);
    }
}
