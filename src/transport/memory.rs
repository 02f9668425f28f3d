// In-process hub: a complete RealtimeTransport over tokio channels. Used by
// the demo binary and the test suite; also the reference for what a network
// adapter must provide.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{
    PresenceEvent, PresenceSubscription, RealtimeTransport, Subscription, TopicEvent,
};

const DEFAULT_CAPACITY: usize = 100;

pub struct InMemoryHub {
    capacity: usize,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<TopicEvent>>>>,
    members: Mutex<HashMap<String, HashMap<String, Value>>>,
    watchers: Mutex<HashMap<String, Vec<mpsc::Sender<PresenceEvent>>>>,
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        InMemoryHub {
            capacity,
            subscribers: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Drop a member as if its connection died: state is removed and watchers
    /// see a `Leave`, without the member publishing anything. Tests use this
    /// to simulate a peer disconnecting mid-typing.
    pub fn disconnect(&self, topic: &str, member: &str) {
        let removed = self
            .members
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(|m| m.remove(member))
            .is_some();

        if removed {
            debug!("member {} dropped from {}", member, topic);
            self.notify_watchers(
                topic,
                PresenceEvent::Leave {
                    member: member.to_string(),
                },
            );
        }
    }

    /// Members currently tracked on a topic.
    pub fn member_count(&self, topic: &str) -> usize {
        self.members
            .lock()
            .unwrap()
            .get(topic)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn notify_watchers(&self, topic: &str, event: PresenceEvent) {
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(senders) = watchers.get_mut(topic) {
            Self::broadcast(senders, event);
        }
    }

    // Fan an event out over a sender list, pruning receivers that have gone
    // away. A full channel is unusual but not fatal; the event is dropped for
    // that subscriber only.
    fn broadcast<T: Clone>(senders: &mut Vec<mpsc::Sender<T>>, event: T) {
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(_) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("subscriber channel full, event dropped");
                true
            }
        });
    }
}

#[async_trait]
impl RealtimeTransport for InMemoryHub {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        let event = TopicEvent {
            topic: topic.to_string(),
            payload,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(topic) {
            Self::broadcast(senders, event);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        debug!("subscribed to {}", topic);
        Ok(Subscription::new(topic.to_string(), rx))
    }

    async fn track(
        &self,
        topic: &str,
        member: &str,
        state: Value,
    ) -> Result<(), TransportError> {
        let joined = {
            let mut members = self.members.lock().unwrap();
            members
                .entry(topic.to_string())
                .or_default()
                .insert(member.to_string(), state.clone())
                .is_none()
        };

        let event = if joined {
            PresenceEvent::Join {
                member: member.to_string(),
                state,
            }
        } else {
            PresenceEvent::Sync {
                member: member.to_string(),
                state,
            }
        };
        self.notify_watchers(topic, event);
        Ok(())
    }

    async fn watch(&self, topic: &str) -> Result<PresenceSubscription, TransportError> {
        let (tx, rx) = mpsc::channel(self.capacity);

        // Replay current membership before any live event can race ahead of it.
        {
            let members = self.members.lock().unwrap();
            if let Some(present) = members.get(topic) {
                for (member, state) in present {
                    if tx
                        .try_send(PresenceEvent::Sync {
                            member: member.clone(),
                            state: state.clone(),
                        })
                        .is_err()
                    {
                        return Err(TransportError::SubscribeFailed(topic.to_string()));
                    }
                }
            }
        }

        self.watchers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        debug!("watching presence on {}", topic);
        Ok(PresenceSubscription::new(topic.to_string(), rx))
    }

    async fn leave(&self, topic: &str, member: &str) -> Result<(), TransportError> {
        self.disconnect(topic, member);
        Ok(())
    }
}
