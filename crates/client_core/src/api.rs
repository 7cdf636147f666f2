//! REST client for the chat API. Every call is a single attempt; a
//! 401-equivalent response always means "force re-authentication".

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use shared::domain::{Message, User};
use shared::error::{ApiError, ErrorCode};
use shared::protocol::{
    AuthRequest, AuthResponse, HistoryResponse, SelfResponse, SendMessageRequest,
    SendMessageResponse, UsersResponse,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiClientError {
    /// Missing/expired/invalid token. Callers redirect to login, never retry.
    #[error("session expired")]
    SessionExpired,
    #[error("{0}")]
    Validation(&'static str),
    /// The server answered but rejected the request (`success: false`).
    #[error("{0}")]
    Rejected(String),
    /// Structured error body from the server (non-2xx with a decodable payload).
    #[error("{}", .0.message)]
    Api(ApiError),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

pub type ApiResult<T> = Result<T, ApiClientError>;

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn login(&self, request: &AuthRequest) -> ApiResult<String>;
    async fn register(&self, request: &AuthRequest) -> ApiResult<String>;
    async fn fetch_self(&self, token: &str) -> ApiResult<User>;
    async fn fetch_users(&self, token: &str) -> ApiResult<Vec<User>>;
    async fn fetch_history(&self, token: &str, peer_id: &str) -> ApiResult<Vec<Message>>;
    async fn send_message(&self, token: &str, receiver_id: &str, content: &str)
        -> ApiResult<Message>;
    async fn mark_read(&self, token: &str, peer_id: &str) -> ApiResult<()>;
}

pub struct HttpChatApi {
    http: Client,
    server_url: String,
    api_key: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            api_key: api_key.into(),
        }
    }

    fn authed(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .bearer_auth(token)
    }

    async fn ensure_success(response: Response) -> Result<Response, ApiClientError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiClientError::SessionExpired);
        }
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<ApiError>(&body) {
            Ok(error) if error.code == ErrorCode::Unauthorized => {
                Err(ApiClientError::SessionExpired)
            }
            Ok(error) => Err(ApiClientError::Api(error)),
            Err(_) => Err(ApiClientError::UnexpectedStatus(status)),
        }
    }

    /// Login and register share one body-driven contract: the outcome is
    /// `success` + `token` in the response, not the HTTP status.
    async fn auth(&self, path: &str, request: &AuthRequest) -> ApiResult<String> {
        request.validate().map_err(ApiClientError::Validation)?;
        let body: AuthResponse = self
            .http
            .post(format!("{}{path}", self.server_url))
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?
            .json()
            .await?;
        match (body.success, body.token) {
            (true, Some(token)) => Ok(token),
            _ => Err(ApiClientError::Rejected(
                body.message
                    .unwrap_or_else(|| "authentication failed".to_string()),
            )),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, request: &AuthRequest) -> ApiResult<String> {
        self.auth("/auth/login", request).await
    }

    async fn register(&self, request: &AuthRequest) -> ApiResult<String> {
        self.auth("/auth/register", request).await
    }

    async fn fetch_self(&self, token: &str) -> ApiResult<User> {
        let response = self
            .authed(self.http.get(format!("{}/user", self.server_url)), token)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body: SelfResponse = response.json().await?;
        Ok(body.user)
    }

    async fn fetch_users(&self, token: &str) -> ApiResult<Vec<User>> {
        let response = self
            .authed(self.http.get(format!("{}/users", self.server_url)), token)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body: UsersResponse = response.json().await?;
        Ok(body.users)
    }

    async fn fetch_history(&self, token: &str, peer_id: &str) -> ApiResult<Vec<Message>> {
        let response = self
            .authed(
                self.http
                    .get(format!("{}/conversation/{peer_id}/messages", self.server_url)),
                token,
            )
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body: HistoryResponse = response.json().await?;
        debug!(peer_id, count = body.messages.len(), "api: history fetched");
        Ok(body.messages)
    }

    async fn send_message(
        &self,
        token: &str,
        receiver_id: &str,
        content: &str,
    ) -> ApiResult<Message> {
        let response = self
            .authed(
                self.http
                    .post(format!("{}/conversation/messages/send", self.server_url)),
                token,
            )
            .json(&SendMessageRequest {
                receiver: receiver_id.to_string(),
                content: content.to_string(),
            })
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let body: SendMessageResponse = response.json().await?;
        match (body.success, body.message) {
            (true, Some(message)) => Ok(message),
            _ => Err(ApiClientError::Rejected(
                body.error.unwrap_or_else(|| "send rejected".to_string()),
            )),
        }
    }

    async fn mark_read(&self, token: &str, peer_id: &str) -> ApiResult<()> {
        let response = self
            .authed(
                self.http
                    .put(format!("{}/conversation/{peer_id}/read", self.server_url)),
                token,
            )
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
