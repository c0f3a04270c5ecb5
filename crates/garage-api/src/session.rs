// ── Bearer-token session ──
//
// One explicit session object shared by the REST client and the push
// channel. Issued at login, invalidated at logout or on the first 401.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Error;

/// Why a session stopped being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// The user logged out.
    Logout,
    /// The backend rejected the token with `401`.
    Unauthorized,
}

/// Session validity as observed through [`Session::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Valid,
    Invalidated(InvalidationReason),
}

/// Authenticated session carrying the backend bearer token.
///
/// Cheap to clone; all clones observe the same validity flag, so a `401`
/// seen by the poller is immediately visible to the dispatcher and channel.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    token: SecretString,
    issued_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Wrap a token obtained from `/api/login` (or stored from an earlier login).
    pub fn new(token: SecretString) -> Self {
        let (state, _) = watch::channel(SessionState::Valid);
        Self {
            inner: Arc::new(SessionInner {
                token,
                issued_at: Utc::now(),
                state,
            }),
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.inner.issued_at
    }

    /// The raw token, for persisting a fresh login.
    pub fn token(&self) -> &SecretString {
        &self.inner.token
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Subscribe to validity changes (the auth collaborator logs out on these).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Mark the session invalid. Only the first call has an effect.
    pub fn invalidate(&self, reason: InvalidationReason) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Valid {
                *state = SessionState::Invalidated(reason);
                true
            } else {
                false
            }
        });

        if changed {
            match reason {
                InvalidationReason::Logout => debug!("session invalidated by logout"),
                InvalidationReason::Unauthorized => {
                    warn!("backend rejected the session token (401), session invalidated");
                }
            }
        }
    }

    /// `Authorization` header value, or an error if the session is no longer usable.
    pub fn bearer_header(&self) -> Result<HeaderValue, Error> {
        if !self.is_valid() {
            return Err(Error::SessionInvalidated);
        }

        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", self.inner.token.expose_secret()))
                .map_err(|e| Error::Authentication {
                    message: format!("token is not a valid header value: {e}"),
                })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SecretString::from("tok-123".to_string()))
    }

    #[test]
    fn bearer_header_carries_token() {
        let header = session().bearer_header().unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok-123");
        assert!(header.is_sensitive());
    }

    #[test]
    fn invalidated_session_refuses_header() {
        let s = session();
        s.invalidate(InvalidationReason::Unauthorized);
        assert!(matches!(s.bearer_header(), Err(Error::SessionInvalidated)));
    }

    #[test]
    fn first_invalidation_reason_wins() {
        let s = session();
        let clone = s.clone();
        s.invalidate(InvalidationReason::Unauthorized);
        clone.invalidate(InvalidationReason::Logout);
        assert_eq!(
            clone.state(),
            SessionState::Invalidated(InvalidationReason::Unauthorized)
        );
    }

    #[test]
    fn subscribers_see_invalidation() {
        let s = session();
        let rx = s.subscribe();
        s.invalidate(InvalidationReason::Logout);
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow(),
            SessionState::Invalidated(InvalidationReason::Logout)
        );
    }
}
