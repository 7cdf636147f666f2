//! Client-side core for the peer-to-peer chat: session gating, REST access,
//! the live event channel, roster previews, and the per-conversation state
//! machine that merges a history snapshot with the event stream.

pub mod api;
pub mod channel;
pub mod conversation;
pub mod roster;
pub mod session;
pub mod transport;

pub use api::{ApiClientError, ChatApi, HttpChatApi};
pub use channel::{EventChannel, EventTransport, InMemoryTransport, Subscription, TransportLifecycle};
pub use conversation::{Conversation, ConversationEvent, ConversationPhase, TYPING_IDLE_WINDOW};
pub use roster::{PreviewIndex, Roster, RosterEvent};
pub use session::{CredentialStore, MemoryCredentialStore, SessionGate, SessionState, TOKEN_KEY};
pub use transport::WsEventTransport;
