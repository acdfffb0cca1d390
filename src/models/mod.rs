/// Data models for the messenger client.
/// Defines conversations, messages, user records, and the WebSocket frame envelope.

pub mod chat;
pub mod message;
pub mod user;

pub use chat::{Conversation, CreateChatRequest, RenameChatRequest};
pub use message::{
    EditMessageRequest, Message, MessageSender, MessageStatus, SendMessageRequest,
};
pub use user::{
    AuthEnvelope, AuthTokens, Contact, FriendRequest, FriendRequestStatus, LoginCredentials,
    RegisterCredentials, UpdateProfileRequest, UserProfile,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Server-assigned conversation identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        ChatId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Client-side dispatch key for this conversation's pushed messages
    pub fn topic(&self) -> String {
        format!("chat:{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        ChatId(id.to_string())
    }
}

/// Message identifier; server-assigned, or `local-<correlation id>` for placeholders
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(message::LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId(id.to_string())
    }
}

/// WebSocket text frame, identical in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Frame {
            topic: topic.into(),
            payload,
        }
    }

    /// Parse an inbound text frame; `None` for anything without a string `type`.
    pub fn parse(text: &str) -> Option<Frame> {
        serde_json::from_str(text).ok()
    }
}

/// Topic used for typing indicators
pub const TYPING_TOPIC: &str = "typing";

/// Typing indicator payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub is_typing: bool,
}
