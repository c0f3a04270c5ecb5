// ── Domain model ──
//
// Canonical representations consumers (the CLI) depend on. Wire types
// from garage-api are translated into these at the reconciliation seam.

pub mod activity;
pub mod device;
pub mod device_id;
pub mod intent;

pub use activity::{Activity, ActivityKind};
pub use device::{Device, DoorState, SensorReading};
pub use device_id::DeviceId;
pub use intent::CommandIntent;

// Wire-level vocabulary shared with the API crate.
pub use garage_api::{Coordinates, DoorAction, ReportedState};
