//! Token verification and character loading

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use crate::game::Character;
use crate::store::{CharacterStore, StoreError};
use crate::util::time::unix_secs;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an AUTH token and produces the character to bind
///
/// The returned future is `'static` so the world can run it off the
/// simulation task.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: String) -> BoxFuture<'static, Result<Character, AuthError>>;
}

/// JWT claims carried by the AUTH token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account ID)
    pub sub: Uuid,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub role: Option<String>,
}

/// Verify an HS256 JWT and extract claims
pub fn verify_jwt(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken);
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;
    let claims: JwtClaims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    if claims.exp < unix_secs() {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("No character for this account")]
    NoCharacter,

    #[error("Already authenticated")]
    AlreadyAuthenticated,

    #[error("Authentication already in progress")]
    InProgress,

    #[error("Character store unavailable")]
    Store(#[from] StoreError),
}

/// Verifies JWTs signed with a shared secret, then loads the account's character
#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: Arc<str>,
    store: Arc<dyn CharacterStore>,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, store: Arc<dyn CharacterStore>) -> Self {
        Self {
            secret: Arc::from(secret),
            store,
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: String) -> BoxFuture<'static, Result<Character, AuthError>> {
        let secret = self.secret.clone();
        let store = self.store.clone();

        Box::pin(async move {
            let claims = verify_jwt(&token, &secret)?;
            debug!(account_id = %claims.sub, "Token verified");

            store
                .load_for_account(claims.sub)
                .await?
                .ok_or(AuthError::NoCharacter)
        })
    }
}
