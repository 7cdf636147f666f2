//! Roster aggregation: the user list plus a live last-message preview per
//! peer.

use std::collections::HashMap;
use std::sync::Arc;

use shared::domain::{Message, User};
use shared::protocol::ChannelEvent;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::api::{ApiClientError, ChatApi};
use crate::channel::{EventChannel, Subscription};

/// Last-message previews keyed by peer id. This is the only mutation
/// surface for preview state; it is injected into both the roster and the
/// open conversation instead of living in ambient shared context.
#[derive(Clone, Default)]
pub struct PreviewIndex {
    inner: Arc<std::sync::Mutex<HashMap<String, String>>>,
}

impl PreviewIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer_id: &str) -> Option<String> {
        self.inner.lock().expect("preview lock").get(peer_id).cloned()
    }

    /// Overwrite the counterpart's preview with the message content when
    /// `self_id` is one of the endpoints. Returns the peer whose preview
    /// changed. Applying the same message twice yields the same preview.
    pub fn apply(&self, message: &Message, self_id: &str) -> Option<String> {
        let peer_id = message.counterpart(self_id)?.to_string();
        self.inner
            .lock()
            .expect("preview lock")
            .insert(peer_id.clone(), message.content.clone());
        Some(peer_id)
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().expect("preview lock").clone()
    }
}

#[derive(Debug, Clone)]
pub enum RosterEvent {
    SelfLoaded(User),
    UsersLoaded(Vec<User>),
    PreviewUpdated { peer_id: String },
    SessionExpired,
    Error(String),
}

pub struct Roster {
    api: Arc<dyn ChatApi>,
    channel: EventChannel,
    previews: PreviewIndex,
    events: broadcast::Sender<RosterEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Roster {
    pub fn new(api: Arc<dyn ChatApi>, channel: EventChannel, previews: PreviewIndex) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            api,
            channel,
            previews,
            events,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RosterEvent> {
        self.events.subscribe()
    }

    pub fn previews(&self) -> &PreviewIndex {
        &self.previews
    }

    /// Fetch the own profile and the user list in parallel, then derive a
    /// preview per peer from the last element of that conversation's
    /// history. An empty history is no preview, not an error; a per-peer
    /// fetch failure leaves the other peers intact.
    pub async fn load(&self, token: &str) -> Result<(User, Vec<User>), ApiClientError> {
        let (self_user, users) =
            match tokio::try_join!(self.api.fetch_self(token), self.api.fetch_users(token)) {
                Ok(pair) => pair,
                Err(ApiClientError::SessionExpired) => {
                    let _ = self.events.send(RosterEvent::SessionExpired);
                    return Err(ApiClientError::SessionExpired);
                }
                Err(err) => {
                    let _ = self
                        .events
                        .send(RosterEvent::Error(format!("failed to load roster: {err}")));
                    return Err(err);
                }
            };
        info!(users = users.len(), "roster: loaded");
        let _ = self.events.send(RosterEvent::SelfLoaded(self_user.clone()));
        let _ = self.events.send(RosterEvent::UsersLoaded(users.clone()));

        for user in &users {
            if user.id == self_user.id {
                continue;
            }
            match self.api.fetch_history(token, &user.id).await {
                Ok(history) => {
                    if let Some(last) = history.last() {
                        if let Some(peer_id) = self.previews.apply(last, &self_user.id) {
                            let _ = self.events.send(RosterEvent::PreviewUpdated { peer_id });
                        }
                    }
                }
                Err(err) => {
                    warn!(peer_id = %user.id, "roster: preview fetch failed: {err}");
                    let _ = self.events.send(RosterEvent::Error(format!(
                        "failed to fetch last message for {}: {err}",
                        user.username
                    )));
                }
            }
        }

        Ok((self_user, users))
    }

    /// Subscribe to the live channel: announce `join` on every connect (a
    /// reconnect must re-register routing, not just the first connect) and
    /// keep previews current from inbound `new` events.
    pub async fn attach(&self, self_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.clear();

        let channel = self.channel.clone();
        let user_id = self_id.to_string();
        subscriptions.push(self.channel.on_connect(move || {
            let channel = channel.clone();
            let user_id = user_id.clone();
            async move {
                if let Err(err) = channel.emit(ChannelEvent::Join { user_id }).await {
                    warn!("roster: join emit failed: {err}");
                }
            }
        }));

        let previews = self.previews.clone();
        let events = self.events.clone();
        let self_id = self_id.to_string();
        subscriptions.push(self.channel.on(move |event| {
            let previews = previews.clone();
            let events = events.clone();
            let self_id = self_id.clone();
            async move {
                if let ChannelEvent::New { message } = event {
                    if let Some(peer_id) = previews.apply(&message, &self_id) {
                        let _ = events.send(RosterEvent::PreviewUpdated { peer_id });
                    }
                }
            }
        }));
    }

    pub async fn detach(&self) {
        self.subscriptions.lock().await.clear();
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
