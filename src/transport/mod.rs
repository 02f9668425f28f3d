// Real-time pub/sub substrate. Topics carry JSON payloads; the presence
// extension tracks per-member ephemeral state with sync/join/leave semantics.
// Conversation channels are built on top of this seam in `chat::delivery`
// and `chat::presence`.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::TransportError;

pub mod memory;

pub use memory::InMemoryHub;

/// Lifecycle of a subscription: `Open` after subscribe, `Active` once the
/// first event has been observed, `Closed` after an explicit close or once
/// the sender side goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Active,
    Closed,
}

/// A payload published on a topic.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub payload: Value,
}

/// Presence changes for one topic's membership.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// Existing member state, replayed when a watch attaches, and re-sent on
    /// every state update from a known member.
    Sync { member: String, state: Value },
    /// A member tracked state on this topic for the first time.
    Join { member: String, state: Value },
    /// A member left or was disconnected. Its last state no longer holds.
    Leave { member: String },
}

/// Receiving half of a topic subscription, with an explicit lifecycle.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<TopicEvent>,
    state: ChannelState,
}

impl Subscription {
    pub fn new(topic: String, rx: mpsc::Receiver<TopicEvent>) -> Self {
        Subscription {
            topic,
            rx,
            state: ChannelState::Open,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Next event, or None once the channel is closed.
    pub async fn next_event(&mut self) -> Option<TopicEvent> {
        if self.state == ChannelState::Closed {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                self.state = ChannelState::Active;
                Some(event)
            }
            None => {
                self.state = ChannelState::Closed;
                None
            }
        }
    }

    pub fn close(&mut self) {
        self.rx.close();
        self.state = ChannelState::Closed;
    }

    pub fn into_stream(self) -> ReceiverStream<TopicEvent> {
        ReceiverStream::new(self.rx)
    }
}

/// Receiving half of a presence watch. Same lifecycle as `Subscription`.
pub struct PresenceSubscription {
    topic: String,
    rx: mpsc::Receiver<PresenceEvent>,
    state: ChannelState,
}

impl PresenceSubscription {
    pub fn new(topic: String, rx: mpsc::Receiver<PresenceEvent>) -> Self {
        PresenceSubscription {
            topic,
            rx,
            state: ChannelState::Open,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub async fn next_event(&mut self) -> Option<PresenceEvent> {
        if self.state == ChannelState::Closed {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                self.state = ChannelState::Active;
                Some(event)
            }
            None => {
                self.state = ChannelState::Closed;
                None
            }
        }
    }

    pub fn close(&mut self) {
        self.rx.close();
        self.state = ChannelState::Closed;
    }
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Fan a payload out to every live subscriber of the topic.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    /// Publish own ephemeral state on a topic. Last write wins; nothing is
    /// persisted, and the state evaporates with the member.
    async fn track(&self, topic: &str, member: &str, state: Value)
        -> Result<(), TransportError>;

    /// Watch membership of a topic. Current members are replayed as `Sync`
    /// events before live updates start.
    async fn watch(&self, topic: &str) -> Result<PresenceSubscription, TransportError>;

    /// Withdraw own state from a topic; watchers observe a `Leave`.
    async fn leave(&self, topic: &str, member: &str) -> Result<(), TransportError>;
}
