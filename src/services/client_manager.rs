/// Client manager - owns everything tied to one authenticated session.
/// Built once at startup; the socket lives from login (or a restored
/// session) until logout or shutdown.

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{ChatId, LoginCredentials, Message, RegisterCredentials};
use crate::services::chat_sync::ChatSynchronizer;
use crate::services::conversations::ConversationList;
use crate::services::pubsub::Handler;
use crate::services::session::AuthService;
use crate::services::websocket_manager::{ConnectionManager, Connector, WsConnector};
use crate::storage::SessionStore;
use std::sync::Arc;

pub struct ClientManager {
    config: ClientConfig,
    store: Arc<SessionStore>,
    api: Arc<ApiClient>,
    auth: AuthService,
    connection: ConnectionManager,
    conversations: Arc<ConversationList<ApiClient>>,
    active: Option<ChatSynchronizer<ApiClient>>,
    message_listener: Option<Handler<Message>>,
}

impl ClientManager {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Build with a custom socket connector
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let store = match config.session_db_path() {
            Some(path) => Arc::new(SessionStore::open(path)?),
            None => Arc::new(SessionStore::in_memory()?),
        };
        let api = Arc::new(ApiClient::new(&config, Arc::clone(&store))?);
        let auth = AuthService::new(Arc::clone(&api), Arc::clone(&store));
        let connection = ConnectionManager::new(
            config.ws_url.clone(),
            config.reconnect,
            connector,
            store.clone(),
        );
        let conversations = Arc::new(ConversationList::new(Arc::clone(&api)));

        Ok(ClientManager {
            config,
            store,
            api,
            auth,
            connection,
            conversations,
            active: None,
            message_listener: None,
        })
    }

    /// Connect right away if a session was restored from disk.
    /// Returns whether a session was found.
    pub fn start(&self) -> bool {
        if !self.auth.is_authenticated() {
            log::info!("No stored session, waiting for login");
            return false;
        }
        log::info!("Restored session for user {:?}", self.auth.user_id());
        self.connection.connect();
        true
    }

    pub async fn login(&mut self, credentials: &LoginCredentials) -> Result<String> {
        let user_id = self.auth.login(credentials).await?;
        self.connection.connect();
        Ok(user_id)
    }

    pub async fn register(&mut self, credentials: &RegisterCredentials) -> Result<String> {
        let user_id = self.auth.register(credentials).await?;
        self.connection.connect();
        Ok(user_id)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.close_conversation();
        self.connection.shutdown();
        self.auth.logout()
    }

    /// Make `chat_id` the open conversation and load its history.
    /// The previous conversation's topic handler is removed first.
    pub async fn open_conversation(&mut self, chat_id: &ChatId) -> Result<&ChatSynchronizer<ApiClient>> {
        if !self.auth.is_authenticated() {
            return Err(ClientError::Auth("Not logged in".to_string()));
        }
        self.close_conversation();

        let conversations = Arc::clone(&self.conversations);
        let extra = self.message_listener.clone();
        let listener: Handler<Message> = Arc::new(move |message: &Message| {
            conversations.record_message(message);
            if let Some(extra) = &extra {
                extra(message);
            }
        });

        let chat = ChatSynchronizer::with_listener(
            chat_id.clone(),
            Arc::clone(&self.api),
            self.connection.clone(),
            self.auth.user_id(),
            self.config.typing_debounce,
            Some(listener),
        );
        let chat = self.active.insert(chat);

        // A failed load leaves the view open in the failed state
        if let Err(e) = chat.load_history().await {
            log::warn!("History for chat {} unavailable: {}", chat_id, e);
        }
        Ok(&*chat)
    }

    pub fn close_conversation(&mut self) {
        if let Some(chat) = self.active.take() {
            chat.close();
        }
    }

    pub fn active_conversation(&self) -> Option<&ChatSynchronizer<ApiClient>> {
        self.active.as_ref()
    }

    /// Called for every pushed or confirmed message of conversations opened
    /// after this call.
    pub fn set_message_listener(&mut self, listener: Handler<Message>) {
        self.message_listener = Some(listener);
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn conversations(&self) -> &ConversationList<ApiClient> {
        &self.conversations
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// End the session's background work without touching stored tokens.
    pub fn shutdown(&mut self) {
        self.close_conversation();
        self.connection.shutdown();
    }
}
