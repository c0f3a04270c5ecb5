// garage-core: Door state machine, command dispatch and state reconciliation
// between garage-api and consumers (the CLI).

pub mod animation;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod machine;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ControllerConfig, Flavor, SINGLE_DEVICE_ID, TlsVerification};
pub use controller::{ConnectionState, Controller, TransitionTicket};
pub use dispatch::{CommandDispatcher, CommandEndpoint, LocationProvider, PushSink};
pub use error::{CoreError, DispatchError, LocationError, TransitionError};
pub use machine::{DoorStateMachine, MergeOutcome};
pub use store::DataStore;
pub use stream::EntityStream;

pub use model::{
    Activity, ActivityKind, CommandIntent, Coordinates, Device, DeviceId, DoorAction, DoorState,
    ReportedState, SensorReading,
};

// Pass-through types consumers need without depending on garage-api directly.
pub use garage_api::{AccessLogEntry, ChannelStatus, Session};
