//! Status command: one refresh, then render every garage (or one).

use std::sync::Arc;

use tabled::Tabled;

use garage_core::{Controller, Device};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::config::Connection;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct GarageRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Door")]
    door: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Humidity")]
    humidity: String,
    #[tabled(rename = "Last Activity")]
    last_activity: String,
}

impl GarageRow {
    fn new(d: &Device, color: bool) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            door: output::door_label(d.door, color),
            temperature: util::reading(d.sensors.temperature, "°C"),
            humidity: util::reading(d.sensors.humidity, "%"),
            last_activity: util::local_time(d.last_activity),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    connection: Connection,
    args: StatusArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let garage = args.garage;
    let single = garage.is_some();

    let devices: Vec<Arc<Device>> =
        Controller::oneshot(connection.config, connection.session, |ctrl| async move {
            match garage.as_deref() {
                Some(identifier) => {
                    let id = ctrl.resolve_device(Some(identifier))?;
                    Ok(ctrl.store().device_by_id(&id).into_iter().collect())
                }
                None => Ok(ctrl.devices_snapshot().iter().cloned().collect()),
            }
        })
        .await?;

    let out = match devices.as_slice() {
        [one] if single => output::render_single(
            &global.output,
            one.as_ref(),
            |d| util::device_detail(d, &output::door_label(d.door, color)),
            |d| d.door.to_string(),
        ),
        _ => output::render_list(
            &global.output,
            &devices,
            |d| GarageRow::new(d, color),
            |d| format!("{}\t{}", d.id, d.door),
        ),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
