/// Debounced typing indicator.
/// Each call restarts the quiet-period timer; when it fires, a `typing` frame
/// is sent only if the value differs from the last one sent for that chat.

use crate::models::{ChatId, TypingEvent, TYPING_TOPIC};
use crate::services::pubsub::lock;
use crate::services::websocket_manager::ConnectionManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct TypingState {
    chat_id: Option<ChatId>,
    last_sent: Option<bool>,
    timer: Option<JoinHandle<()>>,
}

pub struct TypingDebouncer {
    connection: ConnectionManager,
    quiet: Duration,
    user_id: Option<String>,
    state: Arc<Mutex<TypingState>>,
}

impl TypingDebouncer {
    pub fn new(connection: ConnectionManager, quiet: Duration, user_id: Option<String>) -> Self {
        TypingDebouncer {
            connection,
            quiet,
            user_id,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    pub fn set(&self, chat_id: &ChatId, is_typing: bool) {
        let mut state = lock(&self.state);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.chat_id.as_ref() != Some(chat_id) {
            state.chat_id = Some(chat_id.clone());
            state.last_sent = None;
        }

        let event = TypingEvent {
            chat_id: chat_id.clone(),
            user_id: self.user_id.clone(),
            is_typing,
        };
        let shared = Arc::clone(&self.state);
        let connection = self.connection.clone();
        let quiet = self.quiet;

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;

            let mut state = lock(&shared);
            state.timer = None;
            if state.chat_id.as_ref() != Some(&event.chat_id) || state.last_sent == Some(is_typing) {
                return;
            }
            state.last_sent = Some(is_typing);
            drop(state);

            match serde_json::to_value(&event) {
                Ok(payload) => connection.send(TYPING_TOPIC, payload),
                Err(e) => log::error!("Failed to serialize typing event: {}", e),
            }
        }));
    }

    /// Drop any pending indicator without sending it
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.chat_id = None;
        state.last_sent = None;
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
