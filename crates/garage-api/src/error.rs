use thiserror::Error;

/// Top-level error type for the `garage-api` crate.
///
/// Covers every failure mode of the two backend surfaces: the REST API and
/// the push stream. `garage-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong or expired one-time password).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The backend answered `401`; the session is no longer valid.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// The session was invalidated locally (logout or an earlier `401`).
    #[error("Session invalidated -- log in again")]
    SessionInvalidated,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success HTTP status with the backend's `detail` / `error` text.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The backend accepted the request but reported that the command failed.
    #[error("Command rejected: {message}")]
    CommandRejected { message: String },

    // ── Push stream ─────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// A send was attempted while the channel is down. Sends never queue.
    #[error("Push channel is not connected")]
    NotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the session must be re-issued.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired | Self::SessionInvalidated
        )
    }

    /// Returns `true` if this is a transient error worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::NotConnected => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_are_auth_expired() {
        assert!(Error::SessionExpired.is_auth_expired());
        assert!(Error::SessionInvalidated.is_auth_expired());
        assert!(!Error::NotConnected.is_auth_expired());
    }

    #[test]
    fn not_connected_is_transient() {
        assert!(Error::NotConnected.is_transient());
        assert!(Error::Timeout { timeout_secs: 5 }.is_transient());
        assert!(
            !Error::CommandRejected {
                message: "Too far from garage".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn api_404_is_not_found() {
        let err = Error::Api {
            status: 404,
            message: "Garage not found".into(),
        };
        assert!(err.is_not_found());
    }
}
