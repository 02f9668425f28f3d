// Typing publication. One pending expiry timer per session: every keystroke
// cancels and reschedules it rather than stacking a new one. Publish failures
// are logged and swallowed; typing state must never block the composer.

use log::warn;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chat::presence::state_payload;
use crate::models::PresenceState;
use crate::transport::RealtimeTransport;

pub struct TypingPublisher {
    transport: Arc<dyn RealtimeTransport>,
    topic: String,
    self_id: String,
    idle: Duration,
    inner: Arc<Mutex<TypingInner>>,
}

#[derive(Default)]
struct TypingInner {
    composing: bool,
    expiry: Option<JoinHandle<()>>,
}

impl TypingPublisher {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        topic: String,
        self_id: String,
        idle: Duration,
    ) -> Self {
        TypingPublisher {
            transport,
            topic,
            self_id,
            idle,
            inner: Arc::new(Mutex::new(TypingInner::default())),
        }
    }

    /// Report a composer edit. The empty→non-empty transition publishes
    /// `typing=true` exactly once; further keystrokes only push the expiry
    /// out. An emptied field withdraws the indicator immediately.
    pub async fn input_changed(&self, field_is_empty: bool) {
        let mut inner = self.inner.lock().await;

        if field_is_empty {
            if let Some(timer) = inner.expiry.take() {
                timer.abort();
            }
            if inner.composing {
                inner.composing = false;
                drop(inner);
                publish(&*self.transport, &self.topic, &self.self_id, false).await;
            }
            return;
        }

        if !inner.composing {
            inner.composing = true;
            publish(&*self.transport, &self.topic, &self.self_id, true).await;
        }

        // Cancel-and-reschedule the single expiry timer.
        if let Some(timer) = inner.expiry.take() {
            timer.abort();
        }
        let transport = self.transport.clone();
        let topic = self.topic.clone();
        let self_id = self.self_id.clone();
        let idle = self.idle;
        let shared = self.inner.clone();
        inner.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut inner = shared.lock().await;
            if inner.composing {
                inner.composing = false;
                inner.expiry = None;
                drop(inner);
                publish(&*transport, &topic, &self_id, false).await;
            }
        }));
    }

    /// Cancel the timer and withdraw the indicator if it is up. Called on
    /// session teardown.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(timer) = inner.expiry.take() {
            timer.abort();
        }
        if inner.composing {
            inner.composing = false;
            drop(inner);
            publish(&*self.transport, &self.topic, &self.self_id, false).await;
        }
    }
}

async fn publish(transport: &dyn RealtimeTransport, topic: &str, self_id: &str, typing: bool) {
    let payload: Value = state_payload(PresenceState::typing(typing));
    if let Err(e) = transport.track(topic, self_id, payload).await {
        warn!("typing publish on {} failed: {}", topic, e);
    }
}
