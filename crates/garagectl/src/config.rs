//! CLI configuration: thin wrapper around `garage_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--api-url, --token, --flavor, etc.).

use secrecy::SecretString;

use garage_config::ConfigError;
use garage_core::{ControllerConfig, Flavor, Session};

use crate::cli::{FlavorArg, GlobalOpts};
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use garage_config::{Config, Profile, config_path, load_config_or_default, save_config};

/// Everything a command needs to talk to one backend.
pub struct Connection {
    pub profile: String,
    pub config: ControllerConfig,
    pub session: Option<Session>,
}

impl From<FlavorArg> for Flavor {
    fn from(arg: FlavorArg) -> Self {
        match arg {
            FlavorArg::Single => Self::Single,
            FlavorArg::Fleet => Self::Fleet,
        }
    }
}

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// The active profile with CLI flag overrides folded in.
///
/// Falls back to a flags-only profile when `--api-url` is given and the
/// config has no matching profile.
pub fn effective_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, cfg);

    let mut profile = match (cfg.profiles.get(&name), &global.api_url) {
        (Some(profile), _) => profile.clone(),
        (None, Some(url)) => Profile::new(url.clone()),
        (None, None) => {
            if global.profile.is_some() {
                return Err(ConfigError::UnknownProfile { name }.into());
            }
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
        // A pinned ws_url belongs to the profile's host, not the override.
        profile.ws_url = None;
    }
    if let Some(flavor) = global.flavor {
        profile.flavor = flavor.into();
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    Ok((name, profile))
}

/// Translate config + flags into a `ControllerConfig` and optional session.
///
/// With `require_token`, a missing token is an error; otherwise the
/// connection carries no session (used by `login`).
pub fn resolve_connection(global: &GlobalOpts, require_token: bool) -> Result<Connection, CliError> {
    let cfg = load_config_or_default();
    let (name, profile) = effective_profile(global, &cfg)?;
    let config = garage_config::profile_to_controller_config(&profile, &cfg.defaults)?;

    let token = match resolve_token_with_flag(&profile, &name, global) {
        Ok(token) => Some(token),
        Err(e) if require_token => return Err(e),
        Err(_) => None,
    };

    Ok(Connection {
        profile: name,
        config,
        session: token.map(Session::new),
    })
}

/// Resolve the token with the CLI flag first, then the shared chain.
fn resolve_token_with_flag(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<SecretString, CliError> {
    if let Some(ref token) = global.token {
        return Ok(SecretString::from(token.clone()));
    }
    Ok(garage_config::resolve_token(profile, profile_name)?)
}
