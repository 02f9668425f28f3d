// In-memory backends. These power the demo binary and the test suite, and
// double as the reference semantics for real adapters: rows are held as raw
// JSON and normalized through `decode_row` on every read, exactly as a
// network-backed adapter would.

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::models::{ConversationKey, Message, MessageDraft, Profile};
use crate::store::{decode_row, MessageStore, ObjectStore, ProfileResolver};

/// Append-only message log held as raw JSON rows.
///
/// Test affordances: `insert_row` seeds arbitrary (possibly malformed) rows,
/// `set_offline` makes every operation fail, `append_count` observes how many
/// appends were attempted.
#[derive(Default)]
pub struct InMemoryMessageStore {
    rows: Mutex<Vec<Value>>,
    offline: AtomicBool,
    append_calls: AtomicUsize,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw row, bypassing append. Rows that fail normalization are
    /// skipped at query time, which is itself behavior under test.
    pub fn insert_row(&self, row: Value) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn append_count(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unreachable(
                "in-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn decoded_rows(&self) -> Vec<Message> {
        let rows = self.rows.lock().unwrap();
        rows.iter()
            .filter_map(|row| match decode_row(row) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("skipping stored row: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, draft: MessageDraft) -> Result<Message, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        if draft.text_content.is_empty() && draft.attachment_ref.is_none() {
            return Err(StoreError::MalformedRow(
                "draft has neither text nor attachment".to_string(),
            ));
        }

        let message = Message {
            id: draft.id,
            sender_id: draft.sender_id,
            recipient_id: draft.recipient_id,
            text_content: draft.text_content,
            attachment_ref: draft.attachment_ref,
            created_at: Utc::now(),
            read_flag: false,
        };

        let row = serde_json::to_value(&message)
            .map_err(|e| StoreError::MalformedRow(e.to_string()))?;
        self.rows.lock().unwrap().push(row);

        Ok(message)
    }

    async fn query_conversation(
        &self,
        key: &ConversationKey,
    ) -> Result<Vec<Message>, StoreError> {
        self.check_online()?;

        let mut messages: Vec<Message> = self
            .decoded_rows()
            .into_iter()
            .filter(|m| key.matches(&m.sender_id, &m.recipient_id))
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(messages)
    }

    async fn query_involving(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        self.check_online()?;

        let mut messages: Vec<Message> = self
            .decoded_rows()
            .into_iter()
            .filter(|m| m.sender_id == user_id || m.recipient_id == user_id)
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(messages)
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), StoreError> {
        self.check_online()?;

        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.get("id").and_then(Value::as_str) == Some(message_id) {
                row["read_flag"] = Value::Bool(true);
                return Ok(());
            }
        }

        Err(StoreError::UnknownMessage(message_id.to_string()))
    }
}

/// Object store keyed by `namespace/key`, returning `mem://` URLs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
    offline: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}/{}", namespace, key))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable(
                "in-memory object store is offline".to_string(),
            ));
        }

        let path = format!("{}/{}", namespace, key);
        let url = format!("mem://{}", path);
        self.objects
            .lock()
            .unwrap()
            .insert(path, (content_type.to_string(), bytes));

        Ok(url)
    }
}

/// Fixed profile table. Unknown users resolve to `None`, which callers treat
/// as a handled case, not an error.
#[derive(Default)]
pub struct StaticProfiles {
    profiles: HashMap<String, Profile>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, user_id: &str, display_name: &str) -> Self {
        self.profiles.insert(
            user_id.to_string(),
            Profile {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                avatar_url: None,
            },
        );
        self
    }

    pub fn with_avatar(mut self, user_id: &str, avatar_url: &str) -> Self {
        if let Some(profile) = self.profiles.get_mut(user_id) {
            profile.avatar_url = Some(avatar_url.to_string());
        }
        self
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.get(user_id).cloned())
    }
}
