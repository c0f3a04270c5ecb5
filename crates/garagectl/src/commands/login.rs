//! Login / logout: trade the backend password for a session token and
//! keep it where the token chain will find it.

use std::io::BufRead;

use secrecy::{ExposeSecret, SecretString};

use garage_core::Controller;

use crate::cli::{GlobalOpts, LoginArgs};
use crate::config::{self, Profile};
use crate::error::CliError;

use super::util;

pub async fn login(args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let connection = config::resolve_connection(global, false)?;
    let profile_name = connection.profile;

    let password = read_password(args.password_stdin)?;
    let session = Controller::login(&connection.config, &password)
        .await
        .map_err(|e| CliError::from(e).for_profile(&profile_name))?;
    tracing::debug!(profile = %profile_name, "login accepted");

    if args.plaintext {
        let mut cfg = config::load_config_or_default();
        let api_url = connection.config.api_url.as_str().trim_end_matches('/').to_owned();
        let profile = cfg
            .profiles
            .entry(profile_name.clone())
            .or_insert_with(|| Profile::new(api_url));
        profile.token = Some(session.token().expose_secret().to_owned());
        config::save_config(&cfg)?;
        if !global.quiet {
            eprintln!("✓ Token saved to {}", config::config_path().display());
        }
    } else {
        garage_config::store_token(&profile_name, session.token())?;
        if !global.quiet {
            eprintln!("✓ Token stored in system keyring for profile '{profile_name}'");
        }
    }
    Ok(())
}

pub fn logout(global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    let profile_name = config::active_profile_name(global, &cfg);

    garage_config::clear_token(&profile_name)?;
    let had_plaintext = cfg
        .profiles
        .get_mut(&profile_name)
        .is_some_and(|p| p.token.take().is_some());
    if had_plaintext {
        config::save_config(&cfg)?;
    }

    if !global.quiet {
        eprintln!("✓ Logged out of profile '{profile_name}'");
    }
    Ok(())
}

fn read_password(from_stdin: bool) -> Result<SecretString, CliError> {
    let raw = if from_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_owned()
    } else {
        rpassword::prompt_password("Password: ").map_err(util::prompt_err)?
    };

    if raw.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    Ok(SecretString::from(raw))
}
