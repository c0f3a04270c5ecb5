// ── Activity feed ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::device::DoorState;
use super::device_id::DeviceId;
use super::DoorAction;

/// Something observers may want to show in a live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    /// The authoritative door state changed.
    DoorChanged { from: DoorState, to: DoorState },
    TransitionStarted { action: DoorAction },
    TransitionCompleted { state: DoorState },
    /// Dispatch failed; the door went back to `state`.
    TransitionReverted { state: DoorState, reason: String },
    /// A command relayed over the push stream (ours or another client's).
    CommandRelayed { action: Option<DoorAction> },
    BackendError { message: String },
}

/// One entry in the activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub device_id: Option<DeviceId>,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl Activity {
    pub fn now(device_id: Option<DeviceId>, kind: ActivityKind) -> Self {
        Self {
            device_id,
            at: Utc::now(),
            kind,
        }
    }
}
