// ── Core error types ──
//
// User-facing errors from garage-core. Consumers never see raw HTTP
// status codes or JSON failures; the `From<garage_api::Error>` impls
// translate transport-layer errors into domain variants.

use thiserror::Error;

use crate::model::{DeviceId, DoorState};

// ── TransitionError ──────────────────────────────────────────────────

/// A transition request refused by the door state machine's guards.
///
/// Always raised before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A transition is already in flight for garage {device}")]
    InFlight { device: DeviceId },

    #[error("Garage {device} is already {state}")]
    AlreadyInState { device: DeviceId, state: DoorState },

    #[error("Unknown garage: {device}")]
    UnknownDevice { device: DeviceId },
}

// ── LocationError ────────────────────────────────────────────────────

/// Why location proof could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("Location access denied")]
    Denied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

// ── DispatchError ────────────────────────────────────────────────────

/// Why a dispatched command did not succeed. Reverts the optimistic transition.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("Location lookup timed out after {timeout_ms}ms")]
    LocationTimeout { timeout_ms: u64 },

    #[error("Command request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The backend answered `401`; the session has been invalidated.
    #[error("Not authorized -- log in again")]
    Unauthorized,

    #[error("Command rejected: {message}")]
    Rejected { message: String },

    #[error("Command request failed: {0}")]
    Request(garage_api::Error),
}

impl From<garage_api::Error> for DispatchError {
    fn from(err: garage_api::Error) -> Self {
        match err {
            e if e.is_auth_expired() => Self::Unauthorized,
            garage_api::Error::CommandRejected { message } | garage_api::Error::Api { message, .. } => {
                Self::Rejected { message }
            }
            garage_api::Error::Timeout { timeout_secs } => Self::Timeout {
                timeout_ms: timeout_secs.saturating_mul(1000),
            },
            other => Self::Request(other),
        }
    }
}

// ── CoreError ────────────────────────────────────────────────────────

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach garage backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired -- log in again")]
    SessionExpired,

    #[error("Controller disconnected")]
    ControllerDisconnected,

    #[error("Backend request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Garage not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<garage_api::Error> for CoreError {
    fn from(err: garage_api::Error) -> Self {
        match err {
            garage_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            garage_api::Error::SessionExpired | garage_api::Error::SessionInvalidated => {
                CoreError::SessionExpired
            }
            garage_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            garage_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            garage_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            garage_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            garage_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            garage_api::Error::CommandRejected { message } => {
                CoreError::Dispatch(DispatchError::Rejected { message })
            }
            garage_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            garage_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            garage_api::Error::NotConnected => CoreError::ControllerDisconnected,
            garage_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

impl CoreError {
    /// `true` when the user has to log in again before anything will work.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::SessionExpired
                | Self::Dispatch(DispatchError::Unauthorized)
        )
    }
}
