//! Client configuration.
//!
//! Endpoint defaults are fixed when the crate is compiled (`MESSENGER_*_URL`
//! build environment); everything else has in-code defaults that the
//! binary overrides from its command line.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_AUTH_URL: &str = match option_env!("MESSENGER_AUTH_URL") {
    Some(url) => url,
    None => "http://localhost:8080",
};

const DEFAULT_USER_URL: &str = match option_env!("MESSENGER_USER_URL") {
    Some(url) => url,
    None => "http://localhost:8081",
};

const DEFAULT_MESSAGE_URL: &str = match option_env!("MESSENGER_MESSAGE_URL") {
    Some(url) => url,
    None => "http://localhost:8083",
};

const DEFAULT_WS_URL: &str = match option_env!("MESSENGER_WS_URL") {
    Some(url) => url,
    None => "ws://localhost:8083/ws",
};

/// Prefix placed in front of the access token in the `Authorization` header.
pub const AUTH_TOKEN_PREFIX: &str = "Bearer ";

/// Backoff schedule for automatic reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: `min(base * factor^(n-1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(multiplier)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Whether another automatic attempt may be scheduled after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub auth_url: String,
    pub user_url: String,
    pub message_url: String,
    pub ws_url: String,
    pub token_prefix: String,
    /// Applied to every REST call when set; the HTTP client default otherwise.
    pub request_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub typing_debounce: Duration,
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            user_url: DEFAULT_USER_URL.to_string(),
            message_url: DEFAULT_MESSAGE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            token_prefix: AUTH_TOKEN_PREFIX.to_string(),
            request_timeout: None,
            reconnect: ReconnectPolicy::default(),
            typing_debounce: Duration::from_secs(1),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Point every REST service at one base URL (single-gateway deployments and tests).
    pub fn with_api_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        self.auth_url = base.clone();
        self.user_url = base.clone();
        self.message_url = base;
        self
    }

    /// Path of the session database, if a data directory is configured.
    pub fn session_db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("session.db"))
    }
}
