// Wire types for the garage backend REST API.
//
// Field names follow what the backend actually sends. Aliases cover the
// camelCase variants some endpoints use for the same fields.

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

// ── Door state as reported by the backend ───────────────────────────

/// Door state exactly as the backend or firmware reports it.
///
/// The firmware reports `moving` while the actuator runs; the backend's own
/// schema uses `opening` / `closing`. Only `open` and `closed` are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReportedState {
    Open,
    Closed,
    Opening,
    Closing,
    Moving,
}

// ── Actions ──────────────────────────────────────────────────────────

/// A door command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DoorAction {
    Open,
    Close,
}

impl DoorAction {
    /// Path segment for the single-garage endpoint `POST /api/garage/{segment}`.
    ///
    /// The backend names the relay channels rather than the actions.
    pub fn relay_segment(self) -> &'static str {
        match self {
            Self::Open => "left",
            Self::Close => "right",
        }
    }
}

/// Device-derived coordinates proving the user is near the garage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyResponse {
    #[serde(default)]
    pub valid: bool,
}

/// Body of both control endpoints.
///
/// The single-garage endpoint ignores `action` (it is in the path); the
/// fleet endpoint treats the coordinates as optional.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<DoorAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl ControlRequest {
    pub fn new(action: Option<DoorAction>, location: Option<Coordinates>) -> Self {
        Self {
            action,
            latitude: location.map(|c| c.latitude),
            longitude: location.map(|c| c.longitude),
        }
    }
}

/// Raw control response. Single-garage answers `{result}`, fleet answers `{status}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ControlResponse {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Successful acknowledgement from the direct command path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub message: Option<String>,
}

// ── Responses ────────────────────────────────────────────────────────

/// `GET /api/status` -- the single-garage status snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub state: Option<ReportedState>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Upstream failure text (`{"error": "..."}` with HTTP 200).
    #[serde(default)]
    pub error: Option<String>,
}

/// One entry of `GET /api/garages`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GarageRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(alias = "espIdentifier", alias = "esp_identifier")]
    pub esp32_identifier: String,
    #[serde(alias = "currentState")]
    pub current_state: ReportedState,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

/// One entry of `GET /api/logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user: String,
    pub action: String,
}

/// Accept ids the backend sends either as integers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relay_segments_match_backend() {
        assert_eq!(DoorAction::Open.relay_segment(), "left");
        assert_eq!(DoorAction::Close.relay_segment(), "right");
    }

    #[test]
    fn garage_record_accepts_numeric_id_and_camel_case() {
        let rec: GarageRecord = serde_json::from_value(json!({
            "id": 7,
            "name": "Main",
            "espIdentifier": "esp-01",
            "currentState": "opening"
        }))
        .unwrap();
        assert_eq!(rec.id, "7");
        assert_eq!(rec.esp32_identifier, "esp-01");
        assert_eq!(rec.current_state, ReportedState::Opening);
    }

    #[test]
    fn control_request_skips_missing_fields() {
        let body = serde_json::to_value(ControlRequest::new(Some(DoorAction::Close), None)).unwrap();
        assert_eq!(body, json!({ "action": "close" }));
    }

    #[test]
    fn status_report_tolerates_partial_payload() {
        let rep: StatusReport = serde_json::from_value(json!({ "temperature": 21.5 })).unwrap();
        assert_eq!(rep.state, None);
        assert_eq!(rep.temperature, Some(21.5));
    }
}
