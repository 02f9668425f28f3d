// Common test utilities for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use log::LevelFilter;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::chat::attachments::AttachmentSource;
use parley::chat::ChatContext;
use parley::config::ChatConfig;
use parley::store::{InMemoryMessageStore, InMemoryObjectStore, StaticProfiles};
use parley::transport::InMemoryHub;
use parley::SessionEvent;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub struct Fixture {
    pub ctx: ChatContext,
    pub store: Arc<InMemoryMessageStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub hub: Arc<InMemoryHub>,
}

/// Short typing window so indicator expiry is observable in tests.
pub fn test_config() -> ChatConfig {
    ChatConfig {
        typing_idle_ms: 200,
        ..Default::default()
    }
}

pub fn fixture(profiles: &[(&str, &str)]) -> Fixture {
    fixture_with_config(profiles, test_config())
}

pub fn fixture_with_config(profiles: &[(&str, &str)], config: ChatConfig) -> Fixture {
    setup_logging();

    let store = Arc::new(InMemoryMessageStore::new());
    let objects = Arc::new(InMemoryObjectStore::new());
    let hub = Arc::new(InMemoryHub::new());

    let mut table = StaticProfiles::new();
    for (user_id, display_name) in profiles {
        table = table.with_profile(user_id, display_name);
    }

    let ctx = ChatContext::new(
        store.clone(),
        objects.clone(),
        Arc::new(table),
        hub.clone(),
        config,
    );

    Fixture {
        ctx,
        store,
        objects,
        hub,
    }
}

/// Deterministic timestamps for seeded history.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap()
}

/// Seed one well-formed row directly into the store, bypassing append.
pub fn seed_message(
    store: &InMemoryMessageStore,
    id: &str,
    from: &str,
    to: &str,
    text: &str,
    created_at: DateTime<Utc>,
    read: bool,
) {
    store.insert_row(json!({
        "id": id,
        "sender_id": from,
        "recipient_id": to,
        "text_content": text,
        "attachment_ref": null,
        "created_at": created_at.to_rfc3339(),
        "read_flag": read,
    }));
}

/// A message payload as it would travel on a delivery topic.
pub fn wire_message(
    id: &str,
    from: &str,
    to: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> serde_json::Value {
    json!({
        "id": id,
        "sender_id": from,
        "recipient_id": to,
        "text_content": text,
        "attachment_ref": null,
        "created_at": created_at.to_rfc3339(),
        "read_flag": false,
    })
}

pub fn png_attachment(size: usize) -> AttachmentSource {
    AttachmentSource {
        file_name: "listing.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0u8; size],
    }
}

/// Wait for the first session event matching the predicate.
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<SessionEvent>,
    secs: u64,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent> {
    timeout(Duration::from_secs(secs), async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        Err(anyhow::anyhow!("session event channel closed"))
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for session event"))?
}

pub async fn wait_for_history(events: &mut mpsc::Receiver<SessionEvent>) -> Result<()> {
    wait_for_event(events, 5, |e| *e == SessionEvent::HistoryChanged).await?;
    Ok(())
}

/// Let fire-and-forget tasks (read receipts, typing publishes) land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
