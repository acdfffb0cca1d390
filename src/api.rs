//! REST client for the auth, user and message services
//!
//! Every request carries the stored access token as a bearer header. A 401
//! from any service drops the stored token and surfaces as
//! [`ClientError::Unauthorized`]; other non-success statuses become
//! [`ClientError::Api`]. Nothing is retried here.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{
    AuthEnvelope, AuthTokens, ChatId, Contact, Conversation, CreateChatRequest,
    EditMessageRequest, FriendRequest, LoginCredentials, Message, MessageId,
    RegisterCredentials, RenameChatRequest, SendMessageRequest, UpdateProfileRequest,
    UserProfile,
};
use crate::storage::SessionStore;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Message endpoints the chat synchronizer depends on
pub trait MessageApi: Send + Sync {
    fn fetch_messages(&self, chat_id: &ChatId) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn send_message(
        &self,
        chat_id: &ChatId,
        content: &str,
        client_id: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    fn edit_message(
        &self,
        message_id: &MessageId,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    fn delete_message(&self, message_id: &MessageId) -> impl Future<Output = Result<()>> + Send;
}

/// Chat list endpoints the conversation list depends on
pub trait ChatApi: Send + Sync {
    fn list_chats(&self) -> impl Future<Output = Result<Vec<Conversation>>> + Send;

    fn create_chat(
        &self,
        request: &CreateChatRequest,
    ) -> impl Future<Output = Result<Conversation>> + Send;

    fn rename_chat(
        &self,
        chat_id: &ChatId,
        name: &str,
    ) -> impl Future<Output = Result<Conversation>> + Send;

    fn delete_chat(&self, chat_id: &ChatId) -> impl Future<Output = Result<()>> + Send;
}

/// HTTP client for every service the messenger talks to
pub struct ApiClient {
    client: Client,
    auth_url: String,
    user_url: String,
    message_url: String,
    token_prefix: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            user_url: config.user_url.trim_end_matches('/').to_string(),
            message_url: config.message_url.trim_end_matches('/').to_string(),
            token_prefix: config.token_prefix.clone(),
            session,
        })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.session.access_token() {
            Ok(Some(token)) => {
                request.header(AUTHORIZATION, format!("{}{}", self.token_prefix, token))
            }
            Ok(None) => request,
            Err(e) => {
                log::warn!("Failed to read access token: {}", e);
                request
            }
        }
    }

    async fn execute(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            log::warn!("Unauthorized while trying to {}; dropping stored token", action);
            self.session.clear_access_token()?;
            return Err(ClientError::Unauthorized(format!("Failed to {}", action)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!("Failed to {}", action)
            } else {
                format!("Failed to {}: {}", action, body.trim())
            };
            log::error!("{} ({})", message, status);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder, action: &str) -> Result<T> {
        let response = self.execute(request, action).await?;
        Ok(response.json::<T>().await?)
    }

    // Auth service

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthTokens> {
        let request = self
            .request(Method::POST, format!("{}/auth/login", self.auth_url))
            .json(credentials);
        let envelope: AuthEnvelope = self.fetch_json(request, "log in").await?;
        envelope.into_tokens()
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<AuthTokens> {
        let request = self
            .request(Method::POST, format!("{}/auth/register", self.auth_url))
            .json(credentials);
        let envelope: AuthEnvelope = self.fetch_json(request, "register").await?;
        envelope.into_tokens()
    }

    // User service

    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile> {
        let request = self
            .request(Method::GET, format!("{}/users/getByID", self.user_url))
            .query(&[("id", user_id)]);
        self.fetch_json(request, "fetch profile").await
    }

    pub async fn search_users(&self, nickname: &str) -> Result<Vec<UserProfile>> {
        let request = self
            .request(Method::GET, format!("{}/users/search", self.user_url))
            .query(&[("nickname", nickname)]);
        self.fetch_json(request, "search users").await
    }

    pub async fn update_profile(&self, update: &UpdateProfileRequest) -> Result<UserProfile> {
        let request = self
            .request(Method::PUT, format!("{}/users/profile/update", self.user_url))
            .json(update);
        self.fetch_json(request, "update profile").await
    }

    pub async fn friends(&self) -> Result<Vec<Contact>> {
        let request = self.request(Method::GET, format!("{}/contacts/friends", self.user_url));
        self.fetch_json(request, "fetch friends").await
    }

    pub async fn friend_requests(&self) -> Result<Vec<FriendRequest>> {
        let request = self.request(Method::GET, format!("{}/contacts/requests", self.user_url));
        self.fetch_json(request, "fetch friend requests").await
    }

    pub async fn send_friend_request(&self, user_id: &str) -> Result<()> {
        let request = self.request(
            Method::POST,
            format!("{}/contacts/request/{}", self.user_url, user_id),
        );
        self.execute(request, "send friend request").await?;
        Ok(())
    }

    pub async fn accept_friend_request(&self, user_id: &str) -> Result<()> {
        let request = self.request(
            Method::POST,
            format!("{}/contacts/accept/{}", self.user_url, user_id),
        );
        self.execute(request, "accept friend request").await?;
        Ok(())
    }

    pub async fn reject_friend_request(&self, user_id: &str) -> Result<()> {
        let request = self.request(
            Method::POST,
            format!("{}/contacts/reject/{}", self.user_url, user_id),
        );
        self.execute(request, "reject friend request").await?;
        Ok(())
    }

    // Message service: chats

    pub async fn get_chat(&self, chat_id: &ChatId) -> Result<Conversation> {
        let request = self.request(Method::GET, format!("{}/chats/{}", self.message_url, chat_id));
        self.fetch_json(request, "fetch chat").await
    }

    pub async fn add_user_to_chat(&self, chat_id: &ChatId, user_id: &str) -> Result<()> {
        let request = self.request(
            Method::POST,
            format!("{}/chats/{}/users/{}", self.message_url, chat_id, user_id),
        );
        self.execute(request, "add user to chat").await?;
        Ok(())
    }

    pub async fn remove_user_from_chat(&self, chat_id: &ChatId, user_id: &str) -> Result<()> {
        let request = self.request(
            Method::DELETE,
            format!("{}/chats/{}/users/{}", self.message_url, chat_id, user_id),
        );
        self.execute(request, "remove user from chat").await?;
        Ok(())
    }
}

impl ChatApi for ApiClient {
    async fn list_chats(&self) -> Result<Vec<Conversation>> {
        let request = self.request(Method::GET, format!("{}/chats", self.message_url));
        self.fetch_json(request, "fetch chats").await
    }

    async fn create_chat(&self, request: &CreateChatRequest) -> Result<Conversation> {
        let http = self
            .request(Method::POST, format!("{}/chats", self.message_url))
            .json(request);
        self.fetch_json(http, "create chat").await
    }

    async fn rename_chat(&self, chat_id: &ChatId, name: &str) -> Result<Conversation> {
        let body = RenameChatRequest {
            name: name.to_string(),
        };
        let request = self
            .request(Method::PUT, format!("{}/chats/{}", self.message_url, chat_id))
            .json(&body);
        self.fetch_json(request, "rename chat").await
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        let request = self.request(
            Method::DELETE,
            format!("{}/chats/{}", self.message_url, chat_id),
        );
        self.execute(request, "delete chat").await?;
        Ok(())
    }
}

impl MessageApi for ApiClient {
    async fn fetch_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let request = self.request(
            Method::GET,
            format!("{}/chats/{}/messages", self.message_url, chat_id),
        );
        self.fetch_json(request, "fetch messages").await
    }

    async fn send_message(&self, chat_id: &ChatId, content: &str, client_id: &str) -> Result<Message> {
        let body = SendMessageRequest {
            content: content.to_string(),
            client_id: Some(client_id.to_string()),
        };
        let request = self
            .request(
                Method::POST,
                format!("{}/chats/{}/messages", self.message_url, chat_id),
            )
            .json(&body);
        self.fetch_json(request, "send message").await
    }

    async fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<Message> {
        let body = EditMessageRequest {
            content: content.to_string(),
        };
        let request = self
            .request(
                Method::PUT,
                format!("{}/messages/{}", self.message_url, message_id),
            )
            .json(&body);
        self.fetch_json(request, "edit message").await
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        let request = self.request(
            Method::DELETE,
            format!("{}/messages/{}", self.message_url, message_id),
        );
        self.execute(request, "delete message").await?;
        Ok(())
    }
}
