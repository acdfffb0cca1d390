/// Service layer for the messenger client.
/// Session lifetime, realtime connection and per-conversation state.

pub mod chat_sync;
pub mod client_manager;
pub mod conversations;
pub mod pubsub;
pub mod session;
pub mod typing;
pub mod websocket_manager;

pub use chat_sync::{ChatSynchronizer, MessageLog, ViewState};
pub use client_manager::ClientManager;
pub use conversations::ConversationList;
pub use pubsub::{Handler, SubscriptionId, TopicRegistry};
pub use session::AuthService;
pub use typing::TypingDebouncer;
pub use websocket_manager::{
    ConnectionManager, ConnectionState, ConnectionStatus, Connector, CredentialSource,
    FrameSink, FrameStream, WsConnector,
};
