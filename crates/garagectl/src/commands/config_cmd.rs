//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};
use secrecy::SecretString;

use garage_core::Flavor;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use super::util::{self, parse_value, prompt_err};

const REDACTED: &str = "********";

const KEYS: &str = "api_url, ws_url, push, flavor, name, token_env, ca_cert, insecure, timeout, \
                    poll_interval_ms, reconnect_delay_ms, transition_ms, location_timeout_secs, \
                    latitude, longitude";

// ── Helpers ─────────────────────────────────────────────────────────

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    let available: Vec<_> = cfg.profiles.keys().cloned().collect();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Apply one `config set` key to a profile.
fn apply_setting(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key.replace('-', "_").as_str() {
        "api_url" => profile.api_url = value,
        "ws_url" => profile.ws_url = Some(value),
        "push" => profile.push = parse_value(key, &value, "'true' or 'false'")?,
        "flavor" => {
            profile.flavor = parse_value::<Flavor>(key, &value, "'single' or 'fleet'")?;
        }
        "name" => profile.name = Some(value),
        "token_env" => profile.token_env = Some(value),
        "ca_cert" => profile.ca_cert = Some(value.into()),
        "insecure" => profile.insecure = Some(parse_value(key, &value, "'true' or 'false'")?),
        "timeout" => profile.timeout = Some(parse_value(key, &value, "a number (seconds)")?),
        "poll_interval_ms" => {
            profile.poll_interval_ms = Some(parse_value(key, &value, "a number (milliseconds)")?);
        }
        "reconnect_delay_ms" => {
            profile.reconnect_delay_ms =
                Some(parse_value(key, &value, "a number (milliseconds)")?);
        }
        "transition_ms" => {
            profile.transition_ms = Some(parse_value(key, &value, "a number (milliseconds)")?);
        }
        "location_timeout_secs" => {
            profile.location_timeout_secs = Some(parse_value(key, &value, "a number (seconds)")?);
        }
        "latitude" => profile.latitude = Some(parse_value(key, &value, "a number")?),
        "longitude" => profile.longitude = Some(parse_value(key, &value, "a number")?),
        "token" => {
            return Err(CliError::Validation {
                field: key.into(),
                reason: "use 'garagectl login' or 'garagectl config set-token'".into(),
            });
        }
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!("unknown config key '{other}'. Valid keys: {KEYS}"),
            });
        }
    }
    Ok(())
}

/// A copy of the config safe to print.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
    cfg
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("garagectl configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    if config_path.exists()
        && !util::confirm("A config file already exists. Overwrite it?", global.yes)?
    {
        eprintln!("Aborted.");
        return Ok(());
    }

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let api_url: String = Input::new()
        .with_prompt("Backend URL")
        .default("http://garage.local:8000".into())
        .interact_text()
        .map_err(prompt_err)?;

    let flavors = &["Single garage (left/right door)", "Garage fleet"];
    let flavor = match Select::new()
        .with_prompt("Backend type")
        .items(flavors)
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => Flavor::Single,
        _ => Flavor::Fleet,
    };

    let push = Confirm::new()
        .with_prompt("Use the push stream for live updates?")
        .default(true)
        .interact()
        .map_err(prompt_err)?;

    let mut profile = Profile {
        flavor,
        push,
        ..Profile::new(api_url)
    };

    let location: String = Input::new()
        .with_prompt("Fixed location as 'lat,lon' (blank to skip)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    if let Some((lat, lon)) = location.split_once(',') {
        profile.latitude = Some(parse_value("latitude", lat.trim(), "a number")?);
        profile.longitude = Some(parse_value("longitude", lon.trim(), "a number")?);
        profile.coordinates()?;
    }

    let mut cfg = Config {
        default_profile: Some(profile_name.clone()),
        ..Config::default()
    };
    cfg.profiles.insert(profile_name.clone(), profile);
    config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Next: garagectl login");
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(global),

        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| serde_yaml::to_string(c).unwrap_or_else(|_| format!("{c:#?}")),
                |_| "config".into(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            let profile = cfg
                .profiles
                .entry(profile_name.clone())
                .or_insert_with(|| Profile::new(String::new()));

            apply_setting(profile, &key, value)?;

            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: garagectl config init");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetToken { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(profile_name, &cfg));
            }

            let token = rpassword::prompt_password("Session token: ").map_err(prompt_err)?;
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "value cannot be empty".into(),
                });
            }
            garage_config::store_token(&profile_name, &SecretString::from(token))?;
            eprintln!("✓ Token stored in system keyring for profile '{profile_name}'");
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_parses_typed_keys() {
        let mut profile = Profile::new("http://garage.local:8000");
        apply_setting(&mut profile, "flavor", "fleet".into()).unwrap();
        apply_setting(&mut profile, "transition-ms", "8000".into()).unwrap();
        apply_setting(&mut profile, "push", "false".into()).unwrap();

        assert_eq!(profile.flavor, Flavor::Fleet);
        assert_eq!(profile.transition_ms, Some(8000));
        assert!(!profile.push);
    }

    #[test]
    fn set_rejects_unknown_and_malformed() {
        let mut profile = Profile::default();
        assert!(matches!(
            apply_setting(&mut profile, "colour", "red".into()),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(
            apply_setting(&mut profile, "timeout", "soon".into()),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(
            apply_setting(&mut profile, "token", "abc".into()),
            Err(CliError::Validation { .. })
        ));
    }

    #[test]
    fn show_never_prints_tokens() {
        let mut cfg = Config::default();
        let mut profile = Profile::new("http://garage.local:8000");
        profile.token = Some("s3cret".into());
        cfg.profiles.insert("home".into(), profile);

        let shown = redacted(&cfg);
        assert_eq!(shown.profiles["home"].token.as_deref(), Some(REDACTED));
    }
}
