//! Chat synchronizer for the open conversation
//!
//! Combines a one-shot history fetch, messages pushed over the shared
//! connection and the results of local send/edit/delete calls into a single
//! de-duplicated list.
//!
//! Merge rules:
//! - each `load_history` starts a new fetch generation; a response that
//!   belongs to an older generation is dropped with
//!   [`ClientError::StaleResponse`] and never touches the list
//! - mutations arriving while a fetch is in flight are buffered and replayed
//!   on top of the fetched baseline, in arrival order
//! - a record is never replaced by one with an older `updated_at`
//! - new records are inserted by `created_at`, after any entry with the same
//!   timestamp; the baseline keeps the order the server returned
//! - an outgoing message is shown as a `local-<correlation id>` placeholder
//!   until the server's record with the same correlation id replaces it

use crate::api::MessageApi;
use crate::error::{ClientError, Result};
use crate::models::{ChatId, Message, MessageId, MessageStatus};
use crate::services::pubsub::{lock, Handler, SubscriptionId};
use crate::services::typing::TypingDebouncer;
use crate::services::websocket_manager::ConnectionManager;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone)]
enum Mutation {
    Upsert(Message),
    Confirm { client_id: String, message: Message },
    Remove(MessageId),
}

/// Ordered, de-duplicated message list of one conversation
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new(baseline: Vec<Message>) -> Self {
        MessageLog { messages: baseline }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Insert or replace by id. Returns false if `incoming` was older than
    /// the stored record and got ignored.
    pub fn upsert(&mut self, incoming: Message) -> bool {
        if let Some(pos) = self.messages.iter().position(|m| m.id == incoming.id) {
            if self.messages[pos].updated_at > incoming.updated_at {
                log::debug!("Ignoring outdated copy of message {}", incoming.id);
                return false;
            }
            self.messages[pos] = incoming;
            return true;
        }

        if let Some(pos) = self.messages.iter().position(|m| m.confirms(&incoming)) {
            self.messages[pos] = incoming;
            return true;
        }

        let pos = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= incoming.created_at)
            .map_or(0, |p| p + 1);
        self.messages.insert(pos, incoming);
        true
    }

    /// Take `baseline` as the new contents, keeping placeholders of sends the
    /// baseline does not yet include.
    pub fn rebase(&mut self, baseline: Vec<Message>) {
        let in_flight: Vec<Message> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| m.id.is_local())
            .collect();
        self.messages = baseline;

        for placeholder in in_flight {
            if !self.messages.iter().any(|m| placeholder.confirms(m)) {
                self.upsert(placeholder);
            }
        }
    }

    /// Swap the placeholder tagged `client_id` for the server's record.
    pub fn confirm(&mut self, client_id: &str, mut confirmed: Message) {
        if confirmed.client_id.is_none() {
            confirmed.client_id = Some(client_id.to_string());
        }

        let placeholder = self
            .messages
            .iter()
            .position(|m| m.id.is_local() && m.client_id.as_deref() == Some(client_id));
        let known = self.messages.iter().any(|m| m.id == confirmed.id);

        match placeholder {
            // Push already delivered the server record
            Some(pos) if known => {
                self.messages.remove(pos);
                self.upsert(confirmed);
            }
            Some(pos) => self.messages[pos] = confirmed,
            None => {
                self.upsert(confirmed);
            }
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != id);
        self.messages.len() != before
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Upsert(message) => {
                self.upsert(message);
            }
            Mutation::Confirm { client_id, message } => self.confirm(&client_id, message),
            Mutation::Remove(id) => {
                self.remove(&id);
            }
        }
    }
}

struct ConversationView {
    chat_id: ChatId,
    generation: u64,
    state: ViewState,
    log: MessageLog,
    /// Mutations received while a history fetch is in flight
    pending: Vec<Mutation>,
}

impl ConversationView {
    fn new(chat_id: ChatId) -> Self {
        ConversationView {
            chat_id,
            generation: 0,
            state: ViewState::Idle,
            log: MessageLog::default(),
            pending: Vec::new(),
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        if self.state == ViewState::Loading {
            self.pending.push(mutation);
        } else {
            self.log.apply(mutation);
        }
    }

    fn replay_pending(&mut self) {
        for mutation in std::mem::take(&mut self.pending) {
            self.log.apply(mutation);
        }
    }
}

/// Apply one pushed message to the view; malformed payloads are dropped.
fn apply_push(
    view: &Mutex<ConversationView>,
    payload: &Value,
    listener: Option<&Handler<Message>>,
) {
    let mut message: Message = match serde_json::from_value(payload.clone()) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Dropping malformed message push: {}", e);
            return;
        }
    };

    let mut view = lock(view);
    if message.chat_id.as_str().is_empty() {
        message.chat_id = view.chat_id.clone();
    } else if message.chat_id != view.chat_id {
        log::debug!(
            "Push for chat {} delivered to view of {}",
            message.chat_id,
            view.chat_id
        );
        return;
    }
    if payload.get("updatedAt").is_none() {
        // Unversioned push: the local clock must not outrank a server stamp
        message.updated_at = view
            .log
            .get(&message.id)
            .map_or(message.created_at, |stored| stored.updated_at);
    }
    view.apply(Mutation::Upsert(message.clone()));
    drop(view);

    if let Some(listener) = listener {
        listener(&message);
    }
}

/// Synchronized view of one open conversation.
///
/// Subscribes to the conversation's topic on construction and unsubscribes
/// on [`ChatSynchronizer::close`] or drop.
pub struct ChatSynchronizer<A: MessageApi> {
    chat_id: ChatId,
    api: Arc<A>,
    connection: ConnectionManager,
    sender_id: String,
    view: Arc<Mutex<ConversationView>>,
    subscription: Mutex<Option<SubscriptionId>>,
    typing: TypingDebouncer,
    listener: Option<Handler<Message>>,
}

impl<A: MessageApi> ChatSynchronizer<A> {
    pub fn new(
        chat_id: ChatId,
        api: Arc<A>,
        connection: ConnectionManager,
        sender_id: Option<String>,
        typing_debounce: Duration,
    ) -> Self {
        Self::with_listener(chat_id, api, connection, sender_id, typing_debounce, None)
    }

    /// Like [`ChatSynchronizer::new`]; `listener` additionally sees every
    /// pushed or confirmed message (chat list previews, terminal output).
    pub fn with_listener(
        chat_id: ChatId,
        api: Arc<A>,
        connection: ConnectionManager,
        sender_id: Option<String>,
        typing_debounce: Duration,
        listener: Option<Handler<Message>>,
    ) -> Self {
        let view = Arc::new(Mutex::new(ConversationView::new(chat_id.clone())));
        let typing = TypingDebouncer::new(connection.clone(), typing_debounce, sender_id.clone());

        let handler_view = Arc::clone(&view);
        let handler_listener = listener.clone();
        let subscription = connection.subscribe(&chat_id.topic(), move |payload| {
            apply_push(&handler_view, payload, handler_listener.as_ref())
        });
        log::debug!("Subscribed to {}", chat_id.topic());

        ChatSynchronizer {
            chat_id,
            api,
            connection,
            sender_id: sender_id.unwrap_or_default(),
            view,
            subscription: Mutex::new(Some(subscription)),
            typing,
            listener,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn view_state(&self) -> ViewState {
        lock(&self.view).state.clone()
    }

    /// Snapshot of the current list
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.view).log.messages().to_vec()
    }

    /// Fetch the full history and make it the new baseline.
    pub async fn load_history(&self) -> Result<Vec<Message>> {
        let generation = {
            let mut view = lock(&self.view);
            view.generation += 1;
            view.state = ViewState::Loading;
            view.generation
        };
        log::debug!("Loading history for chat {}", self.chat_id);

        let result = self.api.fetch_messages(&self.chat_id).await;

        let mut view = lock(&self.view);
        if view.generation != generation {
            log::debug!("Discarding stale history for chat {}", self.chat_id);
            return Err(ClientError::StaleResponse(self.chat_id.to_string()));
        }

        match result {
            Ok(baseline) => {
                view.log.rebase(baseline);
                view.replay_pending();
                view.state = ViewState::Ready;
                log::info!(
                    "Loaded {} message(s) for chat {}",
                    view.log.len(),
                    self.chat_id
                );
                Ok(view.log.messages().to_vec())
            }
            Err(e) => {
                log::error!("Failed to load messages for chat {}: {}", self.chat_id, e);
                // Keep what was sent or pushed meanwhile
                view.replay_pending();
                view.state = ViewState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Send `text` to the conversation. Whitespace-only text is rejected
    /// before any network call.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("Message text is empty".to_string()));
        }

        let client_id = Uuid::new_v4().to_string();
        let placeholder = Message::placeholder(
            self.chat_id.clone(),
            self.sender_id.clone(),
            content.to_string(),
            client_id.clone(),
        );
        let placeholder_id = placeholder.id.clone();
        lock(&self.view).apply(Mutation::Upsert(placeholder));

        match self.api.send_message(&self.chat_id, content, &client_id).await {
            Ok(mut message) => {
                if message.chat_id.as_str().is_empty() {
                    message.chat_id = self.chat_id.clone();
                }
                if message.status == MessageStatus::Sending {
                    message.status = MessageStatus::Sent;
                }
                lock(&self.view).apply(Mutation::Confirm {
                    client_id,
                    message: message.clone(),
                });
                self.notify(&message);
                Ok(message)
            }
            Err(e) => {
                log::error!("Failed to send message to chat {}: {}", self.chat_id, e);
                lock(&self.view).apply(Mutation::Remove(placeholder_id));
                Err(e)
            }
        }
    }

    /// Replace the content of a confirmed message; the list changes only
    /// once the server accepts the edit.
    pub async fn edit_message(&self, message_id: &MessageId, text: &str) -> Result<Message> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("Message text is empty".to_string()));
        }
        if message_id.is_local() {
            return Err(ClientError::Validation(format!(
                "Message {} is not confirmed yet",
                message_id
            )));
        }

        let mut message = self.api.edit_message(message_id, content).await?;
        if message.chat_id.as_str().is_empty() {
            message.chat_id = self.chat_id.clone();
        }
        if message.chat_id == self.chat_id {
            lock(&self.view).apply(Mutation::Upsert(message.clone()));
            self.notify(&message);
        }
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        if message_id.is_local() {
            return Err(ClientError::Validation(format!(
                "Message {} is not confirmed yet",
                message_id
            )));
        }

        self.api.delete_message(message_id).await?;
        lock(&self.view).apply(Mutation::Remove(message_id.clone()));
        Ok(())
    }

    /// Merge one pushed message payload into the list
    pub fn on_push(&self, payload: &Value) {
        apply_push(&self.view, payload, self.listener.as_ref());
    }

    pub fn set_typing(&self, is_typing: bool) {
        self.typing.set(&self.chat_id, is_typing);
    }

    /// Stop receiving pushes and invalidate any in-flight history fetch.
    pub fn close(&self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.connection.unsubscribe(&self.chat_id.topic(), id);
            log::debug!("Unsubscribed from {}", self.chat_id.topic());
        }
        self.typing.cancel();

        let mut view = lock(&self.view);
        view.generation += 1;
        view.pending.clear();
        if view.state == ViewState::Loading {
            view.state = ViewState::Idle;
        }
    }

    fn notify(&self, message: &Message) {
        if let Some(listener) = &self.listener {
            listener(message);
        }
    }
}

impl<A: MessageApi> Drop for ChatSynchronizer<A> {
    fn drop(&mut self) {
        self.close();
    }
}
