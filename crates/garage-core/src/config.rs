// ── Runtime connection configuration ──
//
// These types describe *how* to reach a garage backend. They carry
// connection tuning but never touch disk: the CLI builds a
// `ControllerConfig` (via garage-config) and hands it in.

use std::time::Duration;

use garage_api::transport::{TlsMode, TransportConfig};
use garage_api::websocket::ChannelConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::model::Coordinates;

/// Id given to the only device of a single-garage backend.
pub const SINGLE_DEVICE_ID: &str = "garage";

/// Which backend API shape to speak.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Flavor {
    /// One garage: `GET /status`, `POST /garage/{left|right}`, polled every second.
    #[default]
    Single,
    /// Many garages: `GET /garages`, `POST /garages/{id}/control`, refreshed on demand.
    Fleet,
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed home servers).
    DangerAcceptInvalid,
}

/// Configuration for one garage backend.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Backend base URL (e.g., `http://garage.local:8000`).
    pub api_url: Url,
    /// Push stream endpoint. `None` disables the stream and the push path.
    pub ws_url: Option<Url>,
    pub flavor: Flavor,
    pub tls: TlsVerification,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Status poll interval. Zero = refresh on demand only.
    pub poll_interval: Duration,
    /// Fixed wait before the push stream reconnects.
    pub reconnect_delay: Duration,
    /// How long a door takes to open or close.
    pub transition_duration: Duration,
    /// Location proof to attach to commands, if the backend requires one.
    pub location: Option<Coordinates>,
    /// Upper bound on resolving location proof.
    pub location_timeout: Duration,
    /// Upper bound on the direct command request.
    pub dispatch_timeout: Duration,
    /// Display name for the single-garage device.
    pub device_name: String,
}

impl ControllerConfig {
    /// Defaults for `flavor`: 1s polling for a single garage, on-demand for a fleet.
    pub fn new(api_url: Url, flavor: Flavor) -> Self {
        let poll_interval = match flavor {
            Flavor::Single => Duration::from_secs(1),
            Flavor::Fleet => Duration::ZERO,
        };

        Self {
            api_url,
            ws_url: None,
            flavor,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            poll_interval,
            reconnect_delay: Duration::from_secs(3),
            transition_duration: Duration::from_millis(7000),
            location: None,
            location_timeout: Duration::from_secs(10),
            dispatch_timeout: Duration::from_secs(15),
            device_name: "Garage".into(),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    pub(crate) fn channel(&self) -> Option<ChannelConfig> {
        self.ws_url.clone().map(|url| {
            let mut config = ChannelConfig::new(url);
            config.reconnect_delay = self.reconnect_delay;
            config.connect_timeout = self.timeout;
            config
        })
    }
}
