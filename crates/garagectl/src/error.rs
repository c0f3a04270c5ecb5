//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use garage_config::ConfigError;
use garage_core::{CoreError, DispatchError, LocationError, TransitionError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const REJECTED: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(dead_code, unused_assignments)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the garage backend at {url}: {reason}")]
    #[diagnostic(
        code(garagectl::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             URL: {url}\n\
             Self-signed certificate? Try --insecure (-k)."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(garagectl::auth_failed),
        help("Check the backend password and run: garagectl login --profile {profile}")
    )]
    AuthFailed { profile: String, message: String },

    #[error("Session expired or rejected by the backend")]
    #[diagnostic(
        code(garagectl::session_expired),
        help("Run: garagectl login --profile {profile}")
    )]
    SessionExpired { profile: String },

    #[error("No session token for profile '{profile}'")]
    #[diagnostic(
        code(garagectl::no_token),
        help(
            "Log in with: garagectl login\n\
             Or set the GARAGE_TOKEN environment variable."
        )
    )]
    NoToken { profile: String },

    // ── Doors ────────────────────────────────────────────────────────

    #[error("Garage '{identifier}' not found")]
    #[diagnostic(
        code(garagectl::not_found),
        help("Run: garagectl status  to see available garages")
    )]
    NotFound { identifier: String },

    #[error("{message}")]
    #[diagnostic(
        code(garagectl::busy),
        help("Wait for the current movement to finish, then try again.")
    )]
    DoorBusy { message: String },

    #[error("{message}")]
    #[diagnostic(code(garagectl::no_op))]
    AlreadyInState { message: String },

    #[error("Command rejected: {message}")]
    #[diagnostic(
        code(garagectl::rejected),
        help("The door was left where it was. The backend may require location proof.")
    )]
    CommandRejected { message: String },

    #[error("Location proof unavailable: {reason}")]
    #[diagnostic(
        code(garagectl::location),
        help("Set latitude and longitude on the profile, or pass --latitude/--longitude.")
    )]
    Location { reason: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error: {message}")]
    #[diagnostic(code(garagectl::api_error))]
    ApiError { status: Option<u16>, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(garagectl::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(garagectl::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: garagectl config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No garage backend configured")]
    #[diagnostic(
        code(garagectl::no_config),
        help(
            "Create a profile with: garagectl config init\n\
             Or pass --api-url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(garagectl::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("{what} timed out after {millis}ms")]
    #[diagnostic(
        code(garagectl::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { what: String, millis: u64 },

    // ── Internal ─────────────────────────────────────────────────────

    #[error("{0}")]
    #[diagnostic(code(garagectl::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::SessionExpired { .. } | Self::NoToken { .. } => {
                exit_code::AUTH
            }
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::DoorBusy { .. } | Self::AlreadyInState { .. } => exit_code::CONFLICT,
            Self::CommandRejected { .. } | Self::Location { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Fill in the active profile on auth errors raised without one.
    pub fn for_profile(self, name: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: name.into(),
                message,
            },
            Self::SessionExpired { .. } => Self::SessionExpired {
                profile: name.into(),
            },
            other => other,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoToken { profile } => Self::NoToken { profile },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: "(see: garagectl config profiles)".into(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

const CURRENT_PROFILE: &str = "<profile>";

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },

            CoreError::ControllerDisconnected => Self::ConnectionFailed {
                url: "(push stream)".into(),
                reason: "not connected".into(),
            },

            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: CURRENT_PROFILE.into(),
                message,
            },

            CoreError::SessionExpired | CoreError::Dispatch(DispatchError::Unauthorized) => {
                Self::SessionExpired {
                    profile: CURRENT_PROFILE.into(),
                }
            }

            CoreError::Timeout { timeout_secs } => Self::Timeout {
                what: "Backend request".into(),
                millis: timeout_secs.saturating_mul(1000),
            },

            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },

            CoreError::Transition(e) => match e {
                TransitionError::InFlight { .. } => Self::DoorBusy {
                    message: e.to_string(),
                },
                TransitionError::AlreadyInState { .. } => Self::AlreadyInState {
                    message: e.to_string(),
                },
                TransitionError::UnknownDevice { device } => Self::NotFound {
                    identifier: device.to_string(),
                },
            },

            CoreError::Dispatch(e) => match e {
                DispatchError::Location(LocationError::Denied) => Self::Location {
                    reason: "access denied".into(),
                },
                DispatchError::Location(LocationError::Unavailable(reason)) => {
                    Self::Location { reason }
                }
                DispatchError::LocationTimeout { timeout_ms } => Self::Timeout {
                    what: "Location lookup".into(),
                    millis: timeout_ms,
                },
                DispatchError::Timeout { timeout_ms } => Self::Timeout {
                    what: "Command request".into(),
                    millis: timeout_ms,
                },
                DispatchError::Rejected { message } => Self::CommandRejected { message },
                DispatchError::Unauthorized => Self::SessionExpired {
                    profile: CURRENT_PROFILE.into(),
                },
                DispatchError::Request(e) => Self::ConnectionFailed {
                    url: "(command request)".into(),
                    reason: e.to_string(),
                },
            },

            CoreError::Api { message, status } => Self::ApiError { status, message },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}
