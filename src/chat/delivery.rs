// Delivery channel: the per-conversation subscription that pushes newly
// appended rows to both participants. Delivery is at-least-once and may be
// reordered; the session restores order and drops duplicates.

use log::{debug, warn};
use serde_json::Value;

use crate::chat::delivery_topic;
use crate::error::TransportError;
use crate::models::{ConversationKey, Message};
use crate::transport::{ChannelState, RealtimeTransport, Subscription};

pub struct DeliveryChannel {
    key: ConversationKey,
    sub: Subscription,
}

impl DeliveryChannel {
    pub async fn open(
        transport: &dyn RealtimeTransport,
        key: &ConversationKey,
    ) -> Result<Self, TransportError> {
        let sub = transport.subscribe(&delivery_topic(key)).await?;
        Ok(DeliveryChannel {
            key: key.clone(),
            sub,
        })
    }

    /// Publish a stored row so both participants' channels observe it. Called
    /// by the sending session after a successful append.
    pub async fn publish(
        transport: &dyn RealtimeTransport,
        key: &ConversationKey,
        message: &Message,
    ) -> Result<(), TransportError> {
        let topic = delivery_topic(key);
        let payload = serde_json::to_value(message).map_err(|e| TransportError::PublishFailed {
            topic: topic.clone(),
            reason: e.to_string(),
        })?;
        transport.publish(&topic, payload).await
    }

    /// Next message for this conversation, or None once the channel closed.
    ///
    /// Payloads that fail to decode are logged and skipped; payloads whose
    /// participants are not exactly this conversation's pair are cross-talk
    /// and are discarded before they can reach the session.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let event = self.sub.next_event().await?;
            match decode_payload(&event.payload) {
                Some(message) => {
                    if !self.key.matches(&message.sender_id, &message.recipient_id) {
                        warn!(
                            "dropping message {} on {}: participants do not match",
                            message.id,
                            self.sub.topic()
                        );
                        continue;
                    }
                    return Some(message);
                }
                None => {
                    warn!("dropping undecodable payload on {}", self.sub.topic());
                }
            }
        }
    }

    pub fn state(&self) -> ChannelState {
        self.sub.state()
    }

    pub fn close(&mut self) {
        debug!("closing delivery channel on {}", self.sub.topic());
        self.sub.close();
    }
}

fn decode_payload(payload: &Value) -> Option<Message> {
    match serde_json::from_value::<Message>(payload.clone()) {
        Ok(message) if message.has_content() && !message.id.is_empty() => Some(message),
        Ok(message) => {
            warn!("message {} failed content invariant", message.id);
            None
        }
        Err(e) => {
            debug!("payload decode failed: {}", e);
            None
        }
    }
}
