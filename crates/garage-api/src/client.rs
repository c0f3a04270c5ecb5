// Garage backend HTTP client
//
// Wraps `reqwest::Client` with `/api` URL construction, bearer-token
// injection from the shared `Session`, and the backend's error shapes
// (`{"detail": ...}` from FastAPI, `{"error": ...}` from the proxy layer).

use serde::Serialize;
use serde::de::DeserializeOwned;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{
    AccessLogEntry, CommandAck, ControlRequest, ControlResponse, Coordinates, DoorAction,
    GarageRecord, LoginRequest, LoginResponse, StatusReport, VerifyResponse,
};
use crate::session::{InvalidationReason, Session};
use crate::transport::TransportConfig;

/// Error body shapes the backend uses on non-2xx responses.
#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// REST client for the garage backend.
///
/// All authenticated calls read the bearer token from the attached
/// [`Session`]. A `401` on any call invalidates that session for every
/// holder of it. Cheap to clone; clones share the connection pool and session.
#[derive(Clone)]
pub struct GarageClient {
    http: reqwest::Client,
    base_url: Url,
    session: Option<Session>,
}

impl GarageClient {
    /// Create an unauthenticated client. Attach a session with
    /// [`with_session`](Self::with_session) or obtain one via [`login`](Self::login).
    ///
    /// `base_url` is the backend root, e.g. `http://garage.local:8000`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            session: None,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            session: None,
        }
    }

    /// Attach the session whose token authorizes every request.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Exchange the one-time password for a session token.
    pub async fn login(&self, password: &SecretString) -> Result<Session, Error> {
        let url = self.api_url("login")?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(&LoginRequest {
                password: password.expose_secret(),
            })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "invalid password".into(),
            });
        }

        let body: LoginResponse = Self::parse_body(resp).await?;
        debug!("login successful, session issued");
        Ok(Session::new(SecretString::from(body.token)))
    }

    /// Ask the backend whether the attached session token is still accepted.
    pub async fn verify_token(&self) -> Result<bool, Error> {
        let url = self.api_url("verify-token")?;
        match self.get::<VerifyResponse>(url).await {
            Ok(body) => Ok(body.valid),
            Err(Error::SessionExpired) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    /// `GET /api/status` -- authoritative state of the single garage.
    pub async fn status(&self) -> Result<StatusReport, Error> {
        let url = self.api_url("status")?;
        let report: StatusReport = self.get(url).await?;
        if let Some(message) = report.error {
            return Err(Error::Api {
                status: 200,
                message,
            });
        }
        Ok(report)
    }

    /// `GET /api/garages` -- every garage visible to this session.
    pub async fn list_garages(&self) -> Result<Vec<GarageRecord>, Error> {
        let url = self.api_url("garages")?;
        self.get(url).await
    }

    /// `GET /api/logs` -- recent activity, newest first.
    pub async fn list_logs(&self) -> Result<Vec<AccessLogEntry>, Error> {
        let url = self.api_url("logs")?;
        self.get(url).await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `POST /api/garage/{left|right}` -- single-garage command with location proof.
    pub async fn trigger(
        &self,
        action: DoorAction,
        location: Option<Coordinates>,
    ) -> Result<CommandAck, Error> {
        let url = self.api_url(&format!("garage/{}", action.relay_segment()))?;
        let resp: ControlResponse = self.post(url, &ControlRequest::new(None, location)).await?;
        Self::interpret_control(resp)
    }

    /// `POST /api/garages/{id}/control` -- fleet command.
    pub async fn control_garage(
        &self,
        garage_id: &str,
        action: DoorAction,
        location: Option<Coordinates>,
    ) -> Result<CommandAck, Error> {
        let url = self.api_url(&format!("garages/{garage_id}/control"))?;
        let resp: ControlResponse = self
            .post(url, &ControlRequest::new(Some(action), location))
            .await?;
        Self::interpret_control(resp)
    }

    /// Map either control response shape onto success or rejection.
    fn interpret_control(resp: ControlResponse) -> Result<CommandAck, Error> {
        if let Some(status) = resp.status {
            return if status.eq_ignore_ascii_case("success") {
                Ok(CommandAck { message: None })
            } else {
                Err(Error::CommandRejected {
                    message: format!("backend reported {status}"),
                })
            };
        }

        match resp.result {
            Some(result) if result.starts_with("Error") || result.starts_with("Invalid") => {
                Err(Error::CommandRejected { message: result })
            }
            result => Ok(CommandAck { message: result }),
        }
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn authorize(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        let session = self.session.as_ref().ok_or_else(|| Error::Authentication {
            message: "not logged in".into(),
        })?;
        Ok(builder.header(reqwest::header::AUTHORIZATION, session.bearer_header()?))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.authorize(self.http.get(url))?.send().await?;
        self.parse_response(resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self.authorize(self.http.post(url).json(body))?.send().await?;
        self.parse_response(resp).await
    }

    /// Handle `401` (invalidate the session) before the generic status mapping.
    async fn parse_response<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            if let Some(session) = &self.session {
                session.invalidate(InvalidationReason::Unauthorized);
            }
            return Err(Error::SessionExpired);
        }
        Self::parse_body(resp).await
    }

    async fn parse_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await?;
        trace!(status = status.as_u16(), len = body.len(), "response body received");

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }
}

/// Pull the human-readable message out of an error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: Some(serde_json::Value::String(detail)),
            ..
        }) => detail,
        Ok(ErrorBody {
            detail: Some(detail),
            ..
        }) => detail.to_string(),
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        _ => preview(body),
    }
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
