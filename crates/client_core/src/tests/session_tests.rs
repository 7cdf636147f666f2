use super::*;
use anyhow::anyhow;

struct FailingStore;

#[async_trait]
impl CredentialStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("storage backend unavailable"))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("storage backend unavailable"))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(anyhow!("storage backend unavailable"))
    }
}

#[tokio::test]
async fn resolves_authenticated_when_token_present() {
    let store = Arc::new(MemoryCredentialStore::new());
    let gate = SessionGate::new(store.clone());
    gate.store_token("jwt-abc").await.expect("store");

    assert_eq!(
        gate.resolve().await,
        SessionState::Authenticated("jwt-abc".to_string())
    );
    assert_eq!(gate.resolve().await.token(), Some("jwt-abc"));
}

#[tokio::test]
async fn resolves_unauthenticated_when_token_absent_or_cleared() {
    let gate = SessionGate::new(Arc::new(MemoryCredentialStore::new()));
    assert_eq!(gate.resolve().await, SessionState::Unauthenticated);

    gate.store_token("jwt-abc").await.expect("store");
    gate.clear_token().await.expect("clear");
    assert_eq!(gate.resolve().await, SessionState::Unauthenticated);
}

#[tokio::test]
async fn storage_failure_fails_closed() {
    let gate = SessionGate::new(Arc::new(FailingStore));
    assert_eq!(gate.resolve().await, SessionState::Unauthenticated);
}

#[tokio::test]
async fn empty_token_is_not_a_session() {
    let gate = SessionGate::new(Arc::new(MemoryCredentialStore::new()));
    gate.store_token("").await.expect("store");
    assert_eq!(gate.resolve().await, SessionState::Unauthenticated);
}
