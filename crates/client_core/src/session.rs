//! Session gate: resolves the persisted credential before any protected
//! component is allowed to touch the network.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

/// Storage key under which the credential token is persisted.
pub const TOKEN_KEY: &str = "token";

/// Opaque key-value credential persistence. The actual backing store lives
/// outside this crate.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store used by tests and the demo CLI.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated(String),
    Unauthenticated,
}

impl SessionState {
    pub fn token(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated(token) => Some(token),
            SessionState::Unauthenticated => None,
        }
    }
}

pub struct SessionGate {
    store: Arc<dyn CredentialStore>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Runs once per view activation. `Unauthenticated` means the caller
    /// must replace the current view with the login surface so back
    /// navigation cannot land on a protected screen. A storage read failure
    /// resolves to `Unauthenticated` (fail closed), never to an error.
    pub async fn resolve(&self) -> SessionState {
        match self.store.get(TOKEN_KEY).await {
            Ok(Some(token)) if !token.is_empty() => SessionState::Authenticated(token),
            Ok(_) => SessionState::Unauthenticated,
            Err(err) => {
                warn!("session: credential read failed, forcing re-authentication: {err}");
                SessionState::Unauthenticated
            }
        }
    }

    pub async fn store_token(&self, token: &str) -> Result<()> {
        self.store.set(TOKEN_KEY, token).await
    }

    pub async fn clear_token(&self) -> Result<()> {
        self.store.remove(TOKEN_KEY).await
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
