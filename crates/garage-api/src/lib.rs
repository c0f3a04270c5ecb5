// garage-api: Async Rust client for the smart-garage backend (REST + push stream)

pub mod client;
pub mod error;
pub mod events;
pub mod models;
pub mod session;
pub mod transport;
pub mod websocket;

pub use client::GarageClient;
pub use error::Error;
pub use events::{CommandEcho, ErrorNotice, InboundEvent, OutboundCommand, ParseError, StatusUpdate};
pub use models::{
    AccessLogEntry, CommandAck, ControlRequest, Coordinates, DoorAction, GarageRecord,
    ReportedState, StatusReport,
};
pub use session::{InvalidationReason, Session, SessionState};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{ChannelConfig, ChannelStatus, ResilientChannel};
