use serde::{Deserialize, Serialize};

use crate::domain::{Message, User};

/// Credentials posted to `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

impl AuthRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Client-side required-field check; a failure here never reaches the
    /// network.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("username is required");
        }
        if self.password.trim().is_empty() {
            return Err("password is required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfResponse {
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub receiver: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub success: bool,
    /// The created message; the server names this field `messages`.
    #[serde(rename = "messages", default)]
    pub message: Option<Message>,
    #[serde(rename = "message", default)]
    pub error: Option<String>,
}

/// Live events exchanged over the bidirectional channel. The `type` strings
/// are the wire names the server routes on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ChannelEvent {
    #[serde(rename_all = "camelCase")]
    Join { user_id: String },
    New { message: Message },
    #[serde(rename_all = "camelCase")]
    Typing { user_id: String, receiver_id: String },
    #[serde(rename_all = "camelCase")]
    StopTyping { user_id: String, receiver_id: String },
    #[serde(rename = "messages-read", rename_all = "camelCase")]
    MessagesRead {
        sender_id: String,
        receiver_id: String,
    },
}

impl ChannelEvent {
    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Join { .. } => "join",
            ChannelEvent::New { .. } => "new",
            ChannelEvent::Typing { .. } => "typing",
            ChannelEvent::StopTyping { .. } => "stopTyping",
            ChannelEvent::MessagesRead { .. } => "messages-read",
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
