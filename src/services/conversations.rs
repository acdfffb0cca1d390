/// Chat list with last-message previews, most recently active first.

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::models::{ChatId, Conversation, CreateChatRequest, Message};
use crate::services::pubsub::lock;
use std::sync::{Arc, Mutex};

pub struct ConversationList<A: ChatApi> {
    api: Arc<A>,
    chats: Mutex<Vec<Conversation>>,
}

fn sort_by_activity(chats: &mut [Conversation]) {
    chats.sort_by_key(|chat| std::cmp::Reverse(chat.activity_at()));
}

impl<A: ChatApi> ConversationList<A> {
    pub fn new(api: Arc<A>) -> Self {
        ConversationList {
            api,
            chats: Mutex::new(Vec::new()),
        }
    }

    /// Replace the list with the server's, keeping previews the server omits.
    pub async fn refresh(&self) -> Result<Vec<Conversation>> {
        let mut fetched = self.api.list_chats().await?;

        let mut chats = lock(&self.chats);
        for chat in fetched.iter_mut() {
            let cached = chats
                .iter()
                .find(|c| c.id == chat.id)
                .and_then(|c| c.last_message.as_ref());
            if let Some(preview) = cached {
                chat.record_message(preview);
            }
        }
        sort_by_activity(&mut fetched);
        *chats = fetched;

        log::info!("Loaded {} chat(s)", chats.len());
        Ok(chats.clone())
    }

    pub async fn create(
        &self,
        name: &str,
        is_group: bool,
        participants: Vec<String>,
    ) -> Result<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Chat name is empty".to_string()));
        }

        let request = CreateChatRequest {
            name: name.to_string(),
            is_group,
            participants,
        };
        let chat = self.api.create_chat(&request).await?;
        log::info!("Created chat {} ({})", chat.name, chat.id);

        let mut chats = lock(&self.chats);
        chats.retain(|c| c.id != chat.id);
        chats.insert(0, chat.clone());
        Ok(chat)
    }

    pub async fn rename(&self, chat_id: &ChatId, name: &str) -> Result<Conversation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Chat name is empty".to_string()));
        }

        let mut renamed = self.api.rename_chat(chat_id, name).await?;

        let mut chats = lock(&self.chats);
        if let Some(existing) = chats.iter_mut().find(|c| &c.id == chat_id) {
            if renamed.last_message.is_none() {
                renamed.last_message = existing.last_message.take();
            }
            *existing = renamed.clone();
        } else {
            chats.push(renamed.clone());
        }
        sort_by_activity(&mut chats);
        Ok(renamed)
    }

    pub async fn delete(&self, chat_id: &ChatId) -> Result<()> {
        self.api.delete_chat(chat_id).await?;
        lock(&self.chats).retain(|c| &c.id != chat_id);
        log::info!("Deleted chat {}", chat_id);
        Ok(())
    }

    /// Update the preview of the message's chat and move it to the top.
    /// Returns false for unknown chats and older messages.
    pub fn record_message(&self, message: &Message) -> bool {
        let mut chats = lock(&self.chats);
        let Some(pos) = chats.iter().position(|c| c.id == message.chat_id) else {
            return false;
        };
        if !chats[pos].record_message(message) {
            return false;
        }
        let chat = chats.remove(pos);
        chats.insert(0, chat);
        true
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<Conversation> {
        lock(&self.chats).iter().find(|c| &c.id == chat_id).cloned()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.chats).clone()
    }
}
