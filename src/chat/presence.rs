// Presence channel: ephemeral member state for one conversation, decoupled
// from the durable log. Lossy by design; nothing here is retried or stored.

use log::{debug, warn};
use serde_json::Value;

use crate::chat::presence_topic;
use crate::error::TransportError;
use crate::models::{ConversationKey, PresenceState};
use crate::transport::{ChannelState, PresenceEvent, PresenceSubscription, RealtimeTransport};

/// A peer's observable presence after mapping transport events. A departed
/// peer always reads as offline and not typing, whatever it last published.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerUpdate {
    pub member: String,
    pub online: bool,
    pub typing: bool,
}

pub struct PresenceChannel {
    topic: String,
    self_id: String,
    sub: PresenceSubscription,
}

impl PresenceChannel {
    /// Watch the conversation's presence topic and announce self as present
    /// (not typing). The watch attaches first so the peer's current state is
    /// replayed to us.
    pub async fn join(
        transport: &dyn RealtimeTransport,
        key: &ConversationKey,
        self_id: &str,
    ) -> Result<Self, TransportError> {
        let topic = presence_topic(key);
        let sub = transport.watch(&topic).await?;
        transport
            .track(&topic, self_id, state_payload(PresenceState::default()))
            .await?;

        Ok(PresenceChannel {
            topic,
            self_id: self_id.to_string(),
            sub,
        })
    }

    /// Next peer state change. Own echoes are filtered out here.
    pub async fn next_peer_update(&mut self) -> Option<PeerUpdate> {
        loop {
            let event = self.sub.next_event().await?;
            let update = match event {
                PresenceEvent::Sync { member, state } | PresenceEvent::Join { member, state } => {
                    PeerUpdate {
                        typing: decode_state(&member, &state).typing,
                        online: true,
                        member,
                    }
                }
                PresenceEvent::Leave { member } => PeerUpdate {
                    member,
                    online: false,
                    typing: false,
                },
            };
            if update.member == self.self_id {
                continue;
            }
            return Some(update);
        }
    }

    pub fn state(&self) -> ChannelState {
        self.sub.state()
    }

    /// Withdraw from the topic and stop observing it.
    pub async fn depart(&mut self, transport: &dyn RealtimeTransport) {
        debug!("departing presence on {}", self.topic);
        if let Err(e) = transport.leave(&self.topic, &self.self_id).await {
            warn!("presence leave on {} failed: {}", self.topic, e);
        }
        self.sub.close();
    }
}

pub(crate) fn state_payload(state: PresenceState) -> Value {
    // PresenceState serializes to a flat object; this cannot fail.
    serde_json::to_value(state).unwrap_or(Value::Null)
}

fn decode_state(member: &str, state: &Value) -> PresenceState {
    match serde_json::from_value(state.clone()) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("unreadable presence state from {}: {}", member, e);
            PresenceState::default()
        }
    }
}
