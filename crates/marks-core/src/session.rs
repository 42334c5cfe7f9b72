//! Session resolution
//!
//! The synchronizer never runs without a signed-in user. Sign-in itself
//! happens elsewhere (the identity provider issues an access token); this
//! module only turns what the configuration holds into a [`User`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::User;

/// Source of the current authenticated identity
pub trait SessionProvider: Send + Sync {
    /// The signed-in user, or `None` when nobody is signed in
    fn current_user(&self) -> Option<User>;
}

/// A session that always resolves to the same user
#[derive(Debug, Clone)]
pub struct StaticSession(pub Option<User>);

impl SessionProvider for StaticSession {
    fn current_user(&self) -> Option<User> {
        self.0.clone()
    }
}

/// Claims read from an access token payload
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Subject, the user id
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiry as a unix timestamp
    #[serde(default)]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT
    ///
    /// The signature is not checked; the backend verifies it on every request.
    pub fn decode(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn is_expired(&self) -> bool {
        self.exp
            .map(|exp| exp <= Utc::now().timestamp())
            .unwrap_or(false)
    }
}

/// Session resolved from configuration
///
/// Explicit `user_id`/`email` settings win. Otherwise the user comes from
/// the access token claims. An expired token resolves to no user.
#[derive(Debug, Clone, Default)]
pub struct TokenSession {
    access_token: Option<String>,
    user_id: Option<String>,
    email: Option<String>,
}

impl TokenSession {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            ..Self::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            access_token: config.access_token.clone(),
            user_id: config.user_id.clone(),
            email: config.email.clone(),
        }
    }

    /// Access token to present to the backend
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn claims(&self) -> Option<TokenClaims> {
        let token = self.access_token.as_deref()?;
        let claims = TokenClaims::decode(token);
        if claims.is_none() {
            warn!("Access token could not be decoded");
        }
        claims
    }
}

impl SessionProvider for TokenSession {
    fn current_user(&self) -> Option<User> {
        let claims = self.claims();

        if let Some(ref claims) = claims {
            if claims.is_expired() {
                debug!("Access token expired");
                return None;
            }
        }

        let id = match self.user_id.as_deref() {
            Some(raw) => Uuid::parse_str(raw).ok()?,
            None => Uuid::parse_str(&claims.as_ref()?.sub).ok()?,
        };

        let email = self
            .email
            .clone()
            .or_else(|| claims.and_then(|c| c.email));

        Some(User { id, email })
    }
}
