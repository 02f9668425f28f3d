// The conversation core: directory, per-conversation session, the two
// real-time channels, and the attachment pipeline.

use std::sync::Arc;

use crate::config::ChatConfig;
use crate::models::ConversationKey;
use crate::store::{MessageStore, ObjectStore, ProfileResolver};
use crate::transport::RealtimeTransport;

pub mod attachments;
pub mod delivery;
pub mod directory;
pub mod presence;
pub mod session;
pub mod typing;

pub use directory::ConversationDirectory;
pub use session::{ConversationSession, SessionEvent, SessionState};

// Topic namespaces, one per channel kind.
pub(crate) mod topics {
    pub const DELIVERY: &str = "conversation";
    pub const PRESENCE: &str = "presence";
}

/// Topic carrying new message rows for one conversation.
pub fn delivery_topic(key: &ConversationKey) -> String {
    let (a, b) = key.pair();
    format!("{}:{}:{}", topics::DELIVERY, a, b)
}

/// Topic carrying ephemeral member state for one conversation.
pub fn presence_topic(key: &ConversationKey) -> String {
    let (a, b) = key.pair();
    format!("{}:{}:{}", topics::PRESENCE, a, b)
}

/// Everything a session or directory needs to operate: the external
/// collaborators plus configuration. Cheap to clone; all collaborators are
/// shared behind `Arc`.
#[derive(Clone)]
pub struct ChatContext {
    pub store: Arc<dyn MessageStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub profiles: Arc<dyn ProfileResolver>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub config: ChatConfig,
}

impl ChatContext {
    pub fn new(
        store: Arc<dyn MessageStore>,
        objects: Arc<dyn ObjectStore>,
        profiles: Arc<dyn ProfileResolver>,
        transport: Arc<dyn RealtimeTransport>,
        config: ChatConfig,
    ) -> Self {
        ChatContext {
            store,
            objects,
            profiles,
            transport,
            config,
        }
    }
}
