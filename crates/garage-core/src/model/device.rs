// ── Garage door domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::device_id::DeviceId;
use super::{DoorAction, ReportedState};

/// The one authoritative door state per device.
///
/// `Opening` and `Closing` are transient: they only exist while a local
/// transition is in flight and always resolve to `Open` / `Closed` or roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DoorState {
    Closed,
    Open,
    Opening,
    Closing,
}

impl DoorState {
    /// Stable state a backend report maps to, if the report is authoritative.
    pub fn from_reported(reported: ReportedState) -> Option<Self> {
        match reported {
            ReportedState::Open => Some(Self::Open),
            ReportedState::Closed => Some(Self::Closed),
            ReportedState::Opening | ReportedState::Closing | ReportedState::Moving => None,
        }
    }

    /// The transient state entered when `action` starts.
    pub fn transient_for(action: DoorAction) -> Self {
        match action {
            DoorAction::Open => Self::Opening,
            DoorAction::Close => Self::Closing,
        }
    }

    /// The stable state reached when `action` completes.
    pub fn terminal_for(action: DoorAction) -> Self {
        match action {
            DoorAction::Open => Self::Open,
            DoorAction::Close => Self::Closed,
        }
    }
}

/// Last known climate reading from the device's sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity, percent.
    pub humidity: Option<f64>,
    pub read_at: Option<DateTime<Utc>>,
}

impl SensorReading {
    /// Overlay the fields present in a new report; absent fields keep their value.
    pub fn merge(&mut self, temperature: Option<f64>, humidity: Option<f64>, at: DateTime<Utc>) {
        if temperature.is_none() && humidity.is_none() {
            return;
        }
        if temperature.is_some() {
            self.temperature = temperature;
        }
        if humidity.is_some() {
            self.humidity = humidity;
        }
        self.read_at = Some(at);
    }
}

/// One controllable garage door.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Identifier the backend assigned to the device hardware (`esp32_identifier`).
    pub hardware_identifier: Option<String>,
    pub name: String,
    pub door: DoorState,
    /// Raw state from the most recent backend report, transient or not.
    pub reported: Option<ReportedState>,
    pub sensors: SensorReading,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, door: DoorState) -> Self {
        Self {
            id,
            hardware_identifier: None,
            name: name.into(),
            door,
            reported: None,
            sensors: SensorReading::default(),
            last_activity: None,
        }
    }

    /// Bump `last_activity`, never moving it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_activity.is_none_or(|prev| prev < at) {
            self.last_activity = Some(at);
        }
    }
}
