/// Message model for the messenger client.
/// Represents one entry in a conversation's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatId, MessageId};

pub(crate) const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Created locally, not yet confirmed by the server
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    pub id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub chat_id: ChatId,
    #[serde(default)]
    pub sender_id: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Falls back to the local clock when absent; pushes without it are
    /// re-stamped from the stored copy before merging
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<MessageSender>,
    /// Correlation id chosen by the sending client, echoed back by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Message {
    /// Create an unconfirmed local copy of an outgoing message
    pub fn placeholder(chat_id: ChatId, sender_id: String, content: String, client_id: String) -> Self {
        let now = Utc::now();
        Message {
            id: MessageId::new(format!("{}{}", LOCAL_ID_PREFIX, client_id)),
            chat_id,
            sender_id,
            content,
            created_at: now,
            updated_at: now,
            status: MessageStatus::Sending,
            sender: None,
            client_id: Some(client_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Sending
    }

    /// True if `other` is the server-confirmed record of this placeholder
    pub fn confirms(&self, other: &Message) -> bool {
        match (&self.client_id, &other.client_id) {
            (Some(mine), Some(theirs)) => self.id.is_local() && mine == theirs,
            _ => false,
        }
    }
}

/// Body of `POST /chats/{id}/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Body of `PUT /messages/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}
