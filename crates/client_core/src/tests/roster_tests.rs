use super::*;
use crate::api::ApiResult;
use crate::channel::InMemoryTransport;
use async_trait::async_trait;
use shared::domain::UserRef;
use shared::protocol::AuthRequest;
use std::time::Duration;

fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        username: name.to_string(),
    }
}

fn message(id: &str, sender: &str, receiver: &str, content: &str) -> Message {
    Message {
        id: id.to_string(),
        sender: UserRef::new(sender, sender),
        receiver: UserRef::new(receiver, receiver),
        content: content.to_string(),
        read: false,
    }
}

#[derive(Default)]
struct FakeChatApi {
    self_user: Option<User>,
    users: Vec<User>,
    histories: HashMap<String, Vec<Message>>,
    unauthorized: bool,
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn login(&self, _request: &AuthRequest) -> ApiResult<String> {
        Ok("jwt".to_string())
    }

    async fn register(&self, _request: &AuthRequest) -> ApiResult<String> {
        Ok("jwt".to_string())
    }

    async fn fetch_self(&self, _token: &str) -> ApiResult<User> {
        if self.unauthorized {
            return Err(ApiClientError::SessionExpired);
        }
        Ok(self.self_user.clone().expect("self user configured"))
    }

    async fn fetch_users(&self, _token: &str) -> ApiResult<Vec<User>> {
        if self.unauthorized {
            return Err(ApiClientError::SessionExpired);
        }
        Ok(self.users.clone())
    }

    async fn fetch_history(&self, _token: &str, peer_id: &str) -> ApiResult<Vec<Message>> {
        Ok(self.histories.get(peer_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        _token: &str,
        _receiver_id: &str,
        _content: &str,
    ) -> ApiResult<Message> {
        Err(ApiClientError::Rejected("not used in roster tests".to_string()))
    }

    async fn mark_read(&self, _token: &str, _peer_id: &str) -> ApiResult<()> {
        Ok(())
    }
}

fn roster_with(api: FakeChatApi) -> (Roster, Arc<InMemoryTransport>) {
    let transport = InMemoryTransport::new();
    let channel = EventChannel::new(transport.clone());
    let roster = Roster::new(Arc::new(api), channel, PreviewIndex::new());
    (roster, transport)
}

async fn wait_for_preview(
    events: &mut broadcast::Receiver<RosterEvent>,
    expected_peer: &str,
) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for preview update")
            .expect("roster events closed");
        if let RosterEvent::PreviewUpdated { peer_id } = event {
            if peer_id == expected_peer {
                return;
            }
        }
    }
}

#[tokio::test]
async fn load_builds_previews_from_last_history_element() {
    let (roster, _transport) = roster_with(FakeChatApi {
        self_user: Some(user("me", "self")),
        users: vec![user("a", "alice"), user("b", "bob")],
        histories: HashMap::from([
            (
                "a".to_string(),
                vec![
                    message("m1", "me", "a", "older"),
                    message("m2", "a", "me", "latest from alice"),
                ],
            ),
            // bob: empty history, no preview, not an error
        ]),
        unauthorized: false,
    });

    let (self_user, users) = roster.load("jwt").await.expect("load");
    assert_eq!(self_user.id, "me");
    assert_eq!(users.len(), 2);
    assert_eq!(
        roster.previews().get("a").as_deref(),
        Some("latest from alice")
    );
    assert_eq!(roster.previews().get("b"), None);
}

#[tokio::test]
async fn expired_session_is_surfaced_not_retried() {
    let (roster, _transport) = roster_with(FakeChatApi {
        unauthorized: true,
        ..FakeChatApi::default()
    });
    let mut events = roster.subscribe_events();

    let err = roster.load("stale").await.expect_err("must fail");
    assert!(matches!(err, ApiClientError::SessionExpired));

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert!(matches!(event, RosterEvent::SessionExpired));
}

#[tokio::test]
async fn join_is_announced_on_every_connect() {
    let (roster, transport) = roster_with(FakeChatApi::default());
    roster.attach("me").await;

    transport.signal_connected();
    // Simulated reconnect must re-register routing.
    transport.signal_connected();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let joins: Vec<_> = transport
        .outbound()
        .into_iter()
        .filter(|event| matches!(event, ChannelEvent::Join { user_id } if user_id == "me"))
        .collect();
    assert_eq!(joins.len(), 2);
}

#[tokio::test]
async fn inbound_new_event_updates_the_counterpart_preview() {
    let (roster, transport) = roster_with(FakeChatApi::default());
    roster.attach("me").await;
    let mut events = roster.subscribe_events();

    transport.inject(ChannelEvent::New {
        message: message("m1", "a", "me", "hello there"),
    });
    wait_for_preview(&mut events, "a").await;
    assert_eq!(roster.previews().get("a").as_deref(), Some("hello there"));

    // Duplicate delivery of the same event leaves the preview unchanged.
    transport.inject(ChannelEvent::New {
        message: message("m1", "a", "me", "hello there"),
    });
    wait_for_preview(&mut events, "a").await;
    assert_eq!(roster.previews().get("a").as_deref(), Some("hello there"));
}

#[tokio::test]
async fn events_for_other_parties_do_not_touch_previews() {
    let (roster, transport) = roster_with(FakeChatApi::default());
    roster.attach("me").await;

    transport.inject(ChannelEvent::New {
        message: message("m1", "a", "b", "not ours"),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(roster.previews().snapshot().is_empty());
}

#[tokio::test]
async fn detach_stops_preview_updates() {
    let (roster, transport) = roster_with(FakeChatApi::default());
    roster.attach("me").await;
    roster.detach().await;

    transport.inject(ChannelEvent::New {
        message: message("m1", "a", "me", "late"),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(roster.previews().get("a"), None);
}
