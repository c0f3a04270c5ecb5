//! Shared configuration for garagectl.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `garage_core::ControllerConfig`. The CLI adds
//! `GlobalOpts`-aware overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use garage_core::{ControllerConfig, Coordinates, Flavor, TlsVerification};

const KEYRING_SERVICE: &str = "garagectl";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("no token configured for profile '{profile}'")]
    NoToken { profile: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick a profile: the explicit name, else `default_profile`, else `"default"`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_push() -> bool {
    true
}

/// A named backend profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "http://garage.local:8000").
    pub api_url: String,

    /// Push stream URL. Derived from `api_url` (`/ws`) when unset.
    pub ws_url: Option<String>,

    /// Disable the push stream entirely.
    #[serde(default = "default_push")]
    pub push: bool,

    /// "single" or "fleet".
    #[serde(default)]
    pub flavor: Flavor,

    /// Display name for a single-garage backend.
    pub name: Option<String>,

    /// Session token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    pub poll_interval_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    /// How long the door takes to travel.
    pub transition_ms: Option<u64>,
    pub location_timeout_secs: Option<u64>,

    /// Fixed location proof sent with commands.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Profile {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            push: true,
            ..Self::default()
        }
    }

    /// Fixed coordinates, if both halves are configured and in range.
    pub fn coordinates(&self) -> Result<Option<Coordinates>, ConfigError> {
        match (self.latitude, self.longitude) {
            (None, None) => Ok(None),
            (Some(latitude), Some(longitude)) => {
                if !(-90.0..=90.0).contains(&latitude) {
                    return Err(invalid("latitude", format!("{latitude} is out of range")));
                }
                if !(-180.0..=180.0).contains(&longitude) {
                    return Err(invalid("longitude", format!("{longitude} is out of range")));
                }
                Ok(Some(Coordinates {
                    latitude,
                    longitude,
                }))
            }
            _ => Err(invalid(
                "latitude/longitude",
                "both must be set, or neither",
            )),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "garagectl", "garagectl").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("garagectl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load config from `path`, layered over defaults and under `GARAGE_*` env.
///
/// Nested keys use a double underscore: `GARAGE_DEFAULTS__TIMEOUT=5`,
/// `GARAGE_PROFILES__HOME__API_URL=...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GARAGE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution (without CLI flags) ────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
}

/// Resolve the session token from the credential chain (no CLI flag step).
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoToken {
        profile: profile_name.into(),
    })
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(token.expose_secret())?;
    Ok(())
}

/// Remove the stored token. A missing entry is not an error.
pub fn clear_token(profile_name: &str) -> Result<(), ConfigError> {
    match keyring_entry(profile_name)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Push stream URL at `/ws` on the same host, with the matching ws scheme.
pub fn derive_ws_url(api_url: &Url) -> Result<Url, ConfigError> {
    let scheme = match api_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(invalid("api_url", format!("unsupported scheme '{other}'"))),
    };
    let mut ws = api_url.clone();
    ws.set_scheme(scheme)
        .map_err(|()| invalid("api_url", "cannot derive push stream URL"))?;
    ws.set_path("/ws");
    ws.set_query(None);
    Ok(ws)
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse()
        .map_err(|_| invalid(field, format!("invalid URL: {raw}")))
}

/// Build a `ControllerConfig` from a profile with no CLI flag overrides.
pub fn profile_to_controller_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let api_url = parse_url("api_url", &profile.api_url)?;
    let mut config = ControllerConfig::new(api_url, profile.flavor);

    config.ws_url = match (&profile.ws_url, profile.push) {
        (_, false) => None,
        (Some(raw), true) => Some(parse_url("ws_url", raw)?),
        (None, true) => Some(derive_ws_url(&config.api_url)?),
    };

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let timeout = profile.timeout.unwrap_or(defaults.timeout);
    if timeout == 0 {
        return Err(invalid("timeout", "must be greater than zero"));
    }
    config.timeout = Duration::from_secs(timeout);

    if let Some(ms) = profile.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = profile.reconnect_delay_ms {
        config.reconnect_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = profile.transition_ms {
        if ms == 0 {
            return Err(invalid("transition_ms", "must be greater than zero"));
        }
        config.transition_duration = Duration::from_millis(ms);
    }
    if let Some(secs) = profile.location_timeout_secs {
        config.location_timeout = Duration::from_secs(secs);
    }
    config.location = profile.coordinates()?;
    if let Some(ref name) = profile.name {
        config.device_name.clone_from(name);
    }

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_api_scheme() {
        let ws = derive_ws_url(&Url::parse("https://garage.example.com/app?x=1").unwrap()).unwrap();
        assert_eq!(ws.as_str(), "wss://garage.example.com/ws");

        let ws = derive_ws_url(&Url::parse("http://10.0.0.5:8000").unwrap()).unwrap();
        assert_eq!(ws.as_str(), "ws://10.0.0.5:8000/ws");
    }

    #[test]
    fn half_coordinates_are_rejected() {
        let mut profile = Profile::new("http://h");
        profile.latitude = Some(52.0);
        assert!(matches!(profile.coordinates(), Err(ConfigError::Validation { .. })));

        profile.longitude = Some(200.0);
        assert!(profile.coordinates().is_err());

        profile.longitude = Some(4.9);
        assert_eq!(
            profile.coordinates().unwrap(),
            Some(Coordinates {
                latitude: 52.0,
                longitude: 4.9
            })
        );
    }

    #[test]
    fn profile_selection_falls_back_to_default() {
        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), Profile::new("http://a"));
        cfg.profiles.insert("cabin".into(), Profile::new("http://b"));

        assert_eq!(cfg.profile(None).unwrap().1.api_url, "http://a");
        assert_eq!(cfg.profile(Some("cabin")).unwrap().0, "cabin");
        assert!(matches!(
            cfg.profile(Some("shed")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn plaintext_token_is_the_last_resort() {
        let mut profile = Profile::new("http://h");
        profile.token = Some("plain".into());
        profile.token_env = Some("GARAGE_CONFIG_UNIT_TEST_UNSET".into());

        let token = resolve_token(&profile, "garage-config-unit-test").unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }
}
