// ── Command intents ──

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::device_id::DeviceId;
use super::{Coordinates, DoorAction};

/// A user's request to move one door, from trigger until acknowledgement.
///
/// Never persisted. `id` exists only to correlate log lines across the
/// state machine, the dispatcher and both send paths.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandIntent {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub action: DoorAction,
    pub issued_at: DateTime<Utc>,
    pub location_proof: Option<Coordinates>,
}

impl CommandIntent {
    pub fn new(device_id: DeviceId, action: DoorAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            action,
            issued_at: Utc::now(),
            location_proof: None,
        }
    }
}
