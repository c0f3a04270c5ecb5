// ── Push stream messages ──
//
// Every frame on the push stream is a JSON object with a `type` tag.
// The canonical shape is `{type, data, timestamp}`, but the firmware
// sends its fields flat (`{type: "status", state, temperature, ...}`)
// and the server broadcast uses `state_update` with a top-level
// `garage_id`. All three are folded into one `InboundEvent`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Coordinates, DoorAction, ReportedState};

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

// ── InboundEvent ─────────────────────────────────────────────────────

/// A typed message received on the push stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status(StatusUpdate),
    CommandAck(CommandEcho),
    Error(ErrorNotice),
}

impl InboundEvent {
    /// The device this event concerns, if the sender named one.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Status(s) => s.device_id.as_deref(),
            Self::CommandAck(c) => c.device_id.as_deref(),
            Self::Error(e) => e.device_id.as_deref(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Status(s) => s.timestamp,
            Self::CommandAck(c) => c.timestamp,
            Self::Error(e) => e.timestamp,
        }
    }
}

/// Authoritative status pushed by the device or the server.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub device_id: Option<String>,
    pub state: Option<ReportedState>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A command relayed over the stream (echo of our own or another client's).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEcho {
    pub device_id: Option<String>,
    pub action: Option<DoorAction>,
    pub payload: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

/// An error reported by the backend on the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorNotice {
    pub device_id: Option<String>,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

// ── Parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Parse one text frame into an [`InboundEvent`].
pub fn parse_inbound(text: &str) -> Result<InboundEvent, ParseError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let timestamp = envelope.timestamp.as_deref().and_then(parse_timestamp);

    // Prefer the `data` object; fall back to the flat top-level fields.
    let fields = match envelope.data {
        Value::Object(map) if !map.is_empty() => map,
        _ => envelope.rest,
    };

    match envelope.kind.as_str() {
        "status" | "state_update" => Ok(InboundEvent::Status(StatusUpdate {
            device_id: device_id(&fields),
            state: reported_state(&fields)?,
            temperature: fields.get("temperature").and_then(Value::as_f64),
            humidity: fields.get("humidity").and_then(Value::as_f64),
            timestamp,
        })),
        "command" => Ok(InboundEvent::CommandAck(CommandEcho {
            device_id: device_id(&fields),
            action: fields
                .get("action")
                .and_then(Value::as_str)
                .and_then(|a| a.parse().ok()),
            payload: Value::Object(fields),
            timestamp,
        })),
        "error" => Ok(InboundEvent::Error(ErrorNotice {
            device_id: device_id(&fields),
            message: fields
                .get("message")
                .or_else(|| fields.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unspecified backend error")
                .to_owned(),
            timestamp,
        })),
        other => Err(ParseError::UnknownType(other.to_owned())),
    }
}

fn device_id(fields: &Map<String, Value>) -> Option<String> {
    ["id", "garage_id", "garageId", "device_id"]
        .iter()
        .find_map(|key| match fields.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

fn reported_state(fields: &Map<String, Value>) -> Result<Option<ReportedState>, ParseError> {
    match fields.get("state") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| ParseError::InvalidField {
                field: "state",
                reason: e.to_string(),
            }),
    }
}

/// RFC 3339, or the naive ISO form the server emits (treated as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

// ── Outbound ─────────────────────────────────────────────────────────

/// Outbound command frame, `{type: "command", data, timestamp}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCommand {
    #[serde(rename = "type")]
    kind: &'static str,
    data: OutboundCommandData,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundCommandData {
    action: DoorAction,
    garage_id: String,
    intent_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
}

impl OutboundCommand {
    pub fn new(
        garage_id: impl Into<String>,
        action: DoorAction,
        intent_id: Uuid,
        location: Option<Coordinates>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: "command",
            data: OutboundCommandData {
                action,
                garage_id: garage_id.into(),
                intent_id,
                latitude: location.map(|c| c.latitude),
                longitude: location.map(|c| c.longitude),
            },
            timestamp: issued_at,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
