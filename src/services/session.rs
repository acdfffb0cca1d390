/// Login, registration and logout.
/// Tokens are only persisted once the access token decodes to a user id.

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::models::{AuthTokens, LoginCredentials, RegisterCredentials};
use crate::storage::SessionStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use std::sync::Arc;

/// Extract the `user_id` claim from a JWT without verifying it.
pub fn decode_user_id(token: &str) -> Result<String> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(ClientError::Auth("Malformed access token".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClientError::Auth(format!("Malformed access token: {}", e)))?;
    let claims: Value = serde_json::from_slice(&bytes)?;

    match claims.get("user_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ClientError::Auth("Access token has no user_id claim".to_string())),
    }
}

pub struct AuthService {
    api: Arc<ApiClient>,
    store: Arc<SessionStore>,
}

impl AuthService {
    pub fn new(api: Arc<ApiClient>, store: Arc<SessionStore>) -> Self {
        AuthService { api, store }
    }

    /// Returns the id of the logged-in user
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<String> {
        credentials.validate()?;
        let tokens = self.api.login(credentials).await?;
        let user_id = self.persist(&tokens)?;
        log::info!("Logged in as {} ({})", credentials.nickname, user_id);
        Ok(user_id)
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<String> {
        credentials.validate()?;
        let tokens = self.api.register(credentials).await?;
        let user_id = self.persist(&tokens)?;
        log::info!("Registered {} ({})", credentials.nickname, user_id);
        Ok(user_id)
    }

    fn persist(&self, tokens: &AuthTokens) -> Result<String> {
        let user_id = decode_user_id(&tokens.access_token)?;
        self.store.save(tokens, &user_id)?;
        Ok(user_id)
    }

    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        log::info!("Logged out");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.store.access_token(), Ok(Some(_)))
    }

    pub fn user_id(&self) -> Option<String> {
        self.store.user_id().ok().flatten()
    }
}
