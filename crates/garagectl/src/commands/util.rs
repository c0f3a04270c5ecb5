//! Shared helpers for command handlers.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use garage_core::Device;

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Parse a `config set` value, naming the key on failure.
pub fn parse_value<T>(key: &str, value: &str, expected: &str) -> Result<T, CliError>
where
    T: FromStr,
{
    value.parse().map_err(|_| CliError::Validation {
        field: key.into(),
        reason: format!("must be {expected}"),
    })
}

/// Local-time rendering for timestamps, `-` when absent.
pub fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "-".into(),
        |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

pub fn reading(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v:.1}{unit}"))
}

/// Multi-line detail view for one garage.
pub fn device_detail(d: &Device, door: &str) -> String {
    [
        format!("ID:          {}", d.id),
        format!("Name:        {}", d.name),
        format!(
            "Hardware:    {}",
            d.hardware_identifier.as_deref().unwrap_or("-")
        ),
        format!("Door:        {door}"),
        format!("Temperature: {}", reading(d.sensors.temperature, "°C")),
        format!("Humidity:    {}", reading(d.sensors.humidity, "%")),
        format!("Activity:    {}", local_time(d.last_activity)),
    ]
    .join("\n")
}
