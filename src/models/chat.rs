/// Conversation model for the messenger client.
/// Represents a direct or group chat as listed by the message service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatId, Message};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ChatId,
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<String>,
    /// Preview cache for the chat list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Replace the preview if `message` is at least as recent as the cached one.
    /// Returns true when the preview changed.
    pub fn record_message(&mut self, message: &Message) -> bool {
        let newer = match &self.last_message {
            Some(last) if last.id == message.id => true,
            Some(last) => message.created_at >= last.created_at,
            None => true,
        };

        if newer {
            self.updated_at = self.updated_at.max(message.updated_at);
            self.last_message = Some(message.clone());
        }
        newer
    }

    /// Timestamp used to order the chat list, most recent activity first
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map_or(self.updated_at, |m| m.created_at.max(self.updated_at))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub name: String,
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameChatRequest {
    pub name: String,
}
