/// User, contact and credential models.
/// Field names follow the user service's snake_case wire format;
/// auth tokens use the auth service's camelCase envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub nickname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Friends and search results share the profile shape
pub type Contact = UserProfile;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub sender: Contact,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

const MAX_NICKNAME_LEN: usize = 50;

fn validate_nickname(nickname: &str, min: usize) -> Result<()> {
    let len = nickname.chars().count();
    if len < min {
        return Err(ClientError::Validation(format!(
            "Nickname must be at least {} characters",
            min
        )));
    }
    if len > MAX_NICKNAME_LEN {
        return Err(ClientError::Validation(format!(
            "Nickname must be at most {} characters",
            MAX_NICKNAME_LEN
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(ClientError::Validation("Password is required".to_string()));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    };

    if valid && !email.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(ClientError::Validation(format!("Invalid email: {}", email)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub nickname: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(nickname: impl Into<String>, password: impl Into<String>) -> Self {
        LoginCredentials {
            nickname: nickname.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_nickname(&self.nickname, 1)?;
        validate_password(&self.password)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCredentials {
    pub nickname: String,
    pub email: String,
    pub password: String,
}

impl RegisterCredentials {
    pub fn new(
        nickname: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        RegisterCredentials {
            nickname: nickname.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_nickname(&self.nickname, 2)?;
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Response body of `/auth/login` and `/auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEnvelope {
    pub data: AuthTokens,
    #[serde(default)]
    pub success: bool,
}

impl AuthEnvelope {
    pub fn into_tokens(self) -> Result<AuthTokens> {
        if !self.success || self.data.access_token.is_empty() {
            return Err(ClientError::Auth("No access token received".to_string()));
        }
        Ok(self.data)
    }
}
