//! Sign-in state handlers
//!
//! `marks` performs no OAuth handshake. Signing in stores an access token
//! issued elsewhere (or, for the local backend, just a user id).

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use marks_core::session::{SessionProvider, TokenClaims};
use marks_core::{Backend, Config, TokenSession};

use crate::output::Output;

/// Options of `marks login`
#[derive(Debug, Default)]
pub struct LoginArgs {
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

/// Store credentials in the config file
pub fn login(args: LoginArgs, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply_login(&mut config, args)?;

    let user = TokenSession::from_config(&config)
        .current_user()
        .context("The given credentials do not identify a user (token expired?)")?;

    config.save().context("Failed to save configuration")?;
    output.success(&format!("Signed in as {}", user.display_name()));
    Ok(())
}

fn apply_login(config: &mut Config, args: LoginArgs) -> Result<()> {
    if let Some(ref token) = args.token {
        let claims = TokenClaims::decode(token).context("Access token is not a valid JWT")?;
        if claims.is_expired() {
            bail!("Access token has expired");
        }
    }

    if let Some(ref id) = args.user_id {
        Uuid::parse_str(id).with_context(|| format!("Invalid user id: {}", id))?;
    }

    if args.token.is_none() && args.user_id.is_none() {
        match config.backend {
            // A local store only needs a stable owner id
            Backend::Local if config.user_id.is_none() => {
                config.user_id = Some(Uuid::new_v4().to_string());
            }
            Backend::Local => {}
            Backend::Supabase => bail!("The hosted backend needs --token"),
        }
    }

    if args.token.is_some() {
        config.access_token = args.token;
    }
    if args.user_id.is_some() {
        config.user_id = args.user_id;
    }
    if args.email.is_some() {
        config.email = args.email;
    }
    Ok(())
}

/// Forget stored credentials
pub fn logout(output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.access_token = None;
    config.user_id = None;
    config.email = None;
    config.save().context("Failed to save configuration")?;

    output.success("Signed out");
    Ok(())
}
