/// Messenger Client Library
/// REST client, realtime connection manager and chat synchronization for the messenger services

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use api::{ApiClient, ChatApi, MessageApi};
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ClientError, Result};
pub use services::{ChatSynchronizer, ClientManager, ConnectionManager, ConnectionState};
pub use storage::SessionStore;
