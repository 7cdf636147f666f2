//! Per-conversation state machine: merges the REST history snapshot with
//! the live event stream into one ordered message sequence, and tracks the
//! two ephemeral signals (typing, read state) alongside it.

use std::sync::Arc;

use shared::domain::{Message, UserRef};
use shared::protocol::ChannelEvent;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::api::{ApiClientError, ChatApi};
use crate::channel::{EventChannel, Subscription};
use crate::roster::PreviewIndex;

/// Idle window after the last keystroke before `stopTyping` is published.
pub const TYPING_IDLE_WINDOW: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Unopened,
    /// History fetch in flight.
    Loading,
    /// Snapshot applied, subscribed, interactive.
    Ready,
    Closed,
}

#[derive(Debug, Clone)]
pub enum ConversationEvent {
    HistoryLoaded { count: usize },
    MessageAppended(Message),
    PeerTypingChanged(bool),
    ReadReceiptsApplied { flipped: usize },
    Error(String),
}

struct ConversationState {
    peer_id: Option<String>,
    /// Bumped on every open/close; a history response whose epoch no longer
    /// matches is discarded instead of clobbering the next peer's state.
    epoch: u64,
    phase: ConversationPhase,
    messages: Vec<Message>,
    locally_typing: bool,
    peer_typing: bool,
}

pub struct Conversation {
    api: Arc<dyn ChatApi>,
    channel: EventChannel,
    previews: PreviewIndex,
    self_user: UserRef,
    token: String,
    inner: Arc<Mutex<ConversationState>>,
    events: broadcast::Sender<ConversationEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    typing_timer: Mutex<Option<JoinHandle<()>>>,
    typing_window: Duration,
}

impl Conversation {
    /// A conversation is only constructed from an authenticated session, so
    /// no network or channel operation can run with an unresolved token.
    pub fn new(
        api: Arc<dyn ChatApi>,
        channel: EventChannel,
        previews: PreviewIndex,
        self_user: UserRef,
        token: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            channel,
            previews,
            self_user,
            token: token.into(),
            inner: Arc::new(Mutex::new(ConversationState {
                peer_id: None,
                epoch: 0,
                phase: ConversationPhase::Unopened,
                messages: Vec::new(),
                locally_typing: false,
                peer_typing: false,
            })),
            events,
            subscriptions: Mutex::new(Vec::new()),
            typing_timer: Mutex::new(None),
            typing_window: TYPING_IDLE_WINDOW,
        }
    }

    /// Shorten the typing debounce; tests use this to avoid real 2s waits.
    pub fn with_typing_window(mut self, window: Duration) -> Self {
        self.typing_window = window;
        self
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.clone()
    }

    pub async fn peer_typing(&self) -> bool {
        self.inner.lock().await.peer_typing
    }

    pub async fn phase(&self) -> ConversationPhase {
        self.inner.lock().await.phase
    }

    pub async fn peer_id(&self) -> Option<String> {
        self.inner.lock().await.peer_id.clone()
    }

    /// Open the conversation with `peer_id`: reset state, subscribe the
    /// live handlers, acknowledge the conversation as read (REST persists
    /// server-side, the event notifies the live peer), then load the
    /// history snapshot. Re-opening with a new peer starts a fresh Loading
    /// cycle and supersedes any fetch still in flight.
    pub async fn open(&self, peer_id: &str) -> Result<(), ApiClientError> {
        let epoch = {
            let mut state = self.inner.lock().await;
            state.epoch += 1;
            state.peer_id = Some(peer_id.to_string());
            state.messages.clear();
            state.locally_typing = false;
            state.peer_typing = false;
            state.phase = ConversationPhase::Loading;
            state.epoch
        };
        self.cancel_typing_timer().await;
        self.register_handlers(peer_id).await;

        if let Err(err) = self.api.mark_read(&self.token, peer_id).await {
            warn!(peer_id, "conversation: mark-read failed: {err}");
            let _ = self.events.send(ConversationEvent::Error(format!(
                "failed to mark conversation read: {err}"
            )));
        }
        if let Err(err) = self
            .channel
            .emit(ChannelEvent::MessagesRead {
                sender_id: self.self_user.id.clone(),
                receiver_id: peer_id.to_string(),
            })
            .await
        {
            warn!(peer_id, "conversation: read receipt emit failed: {err}");
        }

        self.load_history(peer_id, epoch).await
    }

    /// Fetch the full ordered history and replace `messages` wholesale. The
    /// replace only lands if `(peer_id, epoch)` captured at request time
    /// still matches the live state; a response for a superseded peer is
    /// discarded.
    async fn load_history(&self, peer_id: &str, epoch: u64) -> Result<(), ApiClientError> {
        match self.api.fetch_history(&self.token, peer_id).await {
            Ok(history) => {
                let count = history.len();
                {
                    let mut state = self.inner.lock().await;
                    if state.epoch != epoch || state.peer_id.as_deref() != Some(peer_id) {
                        info!(peer_id, "conversation: discarding history for superseded peer");
                        return Ok(());
                    }
                    state.messages = history;
                    state.phase = ConversationPhase::Ready;
                }
                let _ = self.events.send(ConversationEvent::HistoryLoaded { count });
                Ok(())
            }
            Err(err) => {
                let _ = self.events.send(ConversationEvent::Error(format!(
                    "failed to fetch messages: {err}"
                )));
                Err(err)
            }
        }
    }

    /// Blank or whitespace-only text is a no-op: no request, no state
    /// change. On success the server-returned message is appended (never an
    /// optimistic echo), the preview updates, and the message is published
    /// on the channel so the peer's live listener receives it. `Ok(Some)`
    /// tells the caller to clear the input.
    pub async fn send_message(&self, text: &str) -> Result<Option<Message>, ApiClientError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let Some(peer_id) = self.peer_id().await else {
            return Ok(None);
        };

        match self.api.send_message(&self.token, &peer_id, text).await {
            Ok(message) => {
                {
                    let mut state = self.inner.lock().await;
                    if state.peer_id.as_deref() == Some(peer_id.as_str())
                        && !state.messages.iter().any(|m| m.id == message.id)
                    {
                        state.messages.push(message.clone());
                    }
                }
                self.previews.apply(&message, &self.self_user.id);
                let _ = self
                    .events
                    .send(ConversationEvent::MessageAppended(message.clone()));
                if let Err(err) = self
                    .channel
                    .emit(ChannelEvent::New {
                        message: message.clone(),
                    })
                    .await
                {
                    warn!("conversation: publishing sent message failed: {err}");
                }
                Ok(Some(message))
            }
            Err(err) => {
                let _ = self.events.send(ConversationEvent::Error(format!(
                    "failed to send message: {err}"
                )));
                Err(err)
            }
        }
    }

    /// Keystroke notification. The first keystroke while not marked typing
    /// publishes `typing` immediately; every keystroke restarts the
    /// single-slot idle timer, whose expiry publishes `stopTyping` exactly
    /// once. No-op while no peer is in scope.
    pub async fn on_typing(&self) {
        let Some(peer_id) = self.peer_id().await else {
            return;
        };

        let first_keystroke = {
            let mut state = self.inner.lock().await;
            if state.locally_typing {
                false
            } else {
                state.locally_typing = true;
                true
            }
        };
        if first_keystroke {
            if let Err(err) = self
                .channel
                .emit(ChannelEvent::Typing {
                    user_id: self.self_user.id.clone(),
                    receiver_id: peer_id.clone(),
                })
                .await
            {
                warn!("conversation: typing emit failed: {err}");
            }
        }

        let mut timer = self.typing_timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        let inner = Arc::clone(&self.inner);
        let channel = self.channel.clone();
        let self_id = self.self_user.id.clone();
        let window = self.typing_window;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut state = inner.lock().await;
                if !state.locally_typing || state.peer_id.as_deref() != Some(peer_id.as_str()) {
                    return;
                }
                state.locally_typing = false;
            }
            if let Err(err) = channel
                .emit(ChannelEvent::StopTyping {
                    user_id: self_id,
                    receiver_id: peer_id,
                })
                .await
            {
                warn!("conversation: stopTyping emit failed: {err}");
            }
        }));
    }

    /// Tear down: unsubscribe every handler registered for this peer and
    /// clear the sequence so nothing leaks into the next opened peer.
    pub async fn close(&self) {
        self.subscriptions.lock().await.clear();
        self.cancel_typing_timer().await;
        let mut state = self.inner.lock().await;
        state.epoch += 1;
        state.peer_id = None;
        state.messages.clear();
        state.locally_typing = false;
        state.peer_typing = false;
        state.phase = ConversationPhase::Closed;
    }

    async fn cancel_typing_timer(&self) {
        if let Some(handle) = self.typing_timer.lock().await.take() {
            handle.abort();
        }
    }

    async fn register_handlers(&self, peer_id: &str) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.clear();

        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        let channel = self.channel.clone();
        let self_id = self.self_user.id.clone();
        let peer = peer_id.to_string();
        subscriptions.push(self.channel.on(move |event| {
            let inner = Arc::clone(&inner);
            let events = events.clone();
            let channel = channel.clone();
            let self_id = self_id.clone();
            let peer = peer.clone();
            async move {
                handle_channel_event(event, inner, events, channel, self_id, peer).await;
            }
        }));
    }
}

/// Inbound event routing for one open conversation. Events whose subject is
/// not the open peer are a routing filter, not an error.
async fn handle_channel_event(
    event: ChannelEvent,
    inner: Arc<Mutex<ConversationState>>,
    events: broadcast::Sender<ConversationEvent>,
    channel: EventChannel,
    self_id: String,
    peer: String,
) {
    match event {
        ChannelEvent::New { message } => {
            if !message.involves(&self_id, &peer) {
                return;
            }
            let appended = {
                let mut state = inner.lock().await;
                if state.peer_id.as_deref() != Some(peer.as_str()) {
                    return;
                }
                // The self-emitted echo of our own send arrives here too;
                // the send path already appended it, keyed by message id.
                if state.messages.iter().any(|m| m.id == message.id) {
                    false
                } else {
                    state.messages.push(message.clone());
                    true
                }
            };
            if appended {
                let _ = events.send(ConversationEvent::MessageAppended(message));
                // Receiving while the conversation is open implies an
                // immediate read acknowledgment toward the peer.
                if let Err(err) = channel
                    .emit(ChannelEvent::MessagesRead {
                        sender_id: self_id,
                        receiver_id: peer,
                    })
                    .await
                {
                    warn!("conversation: read receipt emit failed: {err}");
                }
            }
        }
        ChannelEvent::Typing { user_id, .. } => {
            set_peer_typing(&inner, &events, &peer, &user_id, true).await;
        }
        ChannelEvent::StopTyping { user_id, .. } => {
            set_peer_typing(&inner, &events, &peer, &user_id, false).await;
        }
        ChannelEvent::MessagesRead { sender_id, .. } => {
            if sender_id != peer {
                return;
            }
            let flipped = {
                let mut state = inner.lock().await;
                if state.peer_id.as_deref() != Some(peer.as_str()) {
                    return;
                }
                let mut flipped = 0;
                // Single pass producing a new sequence; applying the same
                // receipt twice leaves the state unchanged.
                let next: Vec<Message> = state
                    .messages
                    .iter()
                    .cloned()
                    .map(|mut message| {
                        if message.receiver.id == sender_id && !message.read {
                            message.read = true;
                            flipped += 1;
                        }
                        message
                    })
                    .collect();
                state.messages = next;
                flipped
            };
            if flipped > 0 {
                let _ = events.send(ConversationEvent::ReadReceiptsApplied { flipped });
            }
        }
        ChannelEvent::Join { .. } => {}
    }
}

async fn set_peer_typing(
    inner: &Arc<Mutex<ConversationState>>,
    events: &broadcast::Sender<ConversationEvent>,
    peer: &str,
    subject: &str,
    typing: bool,
) {
    if subject != peer {
        return;
    }
    let changed = {
        let mut state = inner.lock().await;
        if state.peer_id.as_deref() != Some(peer) || state.peer_typing == typing {
            false
        } else {
            state.peer_typing = typing;
            true
        }
    };
    if changed {
        let _ = events.send(ConversationEvent::PeerTypingChanged(typing));
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
