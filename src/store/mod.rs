// External collaborators of the conversation core: the durable message log,
// the object store for uploads, and the identity resolver. The core only ever
// sees these traits; concrete backends live behind them.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::{ConversationKey, Message, MessageDraft, Profile};

pub mod memory;

pub use memory::{InMemoryMessageStore, InMemoryObjectStore, StaticProfiles};

/// The durable, append-only message log. `append` assigns `created_at` so the
/// store is the single source of ordering truth; the only mutation it ever
/// accepts afterwards is the read flag.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, draft: MessageDraft) -> Result<Message, StoreError>;

    /// All messages of one conversation, ascending by `(created_at, id)`.
    async fn query_conversation(&self, key: &ConversationKey)
        -> Result<Vec<Message>, StoreError>;

    /// All messages sent or received by one user, descending by `(created_at, id)`.
    async fn query_involving(&self, user_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Flip `read_flag` to true. Idempotent; the flag never goes back.
    async fn mark_read(&self, message_id: &str) -> Result<(), StoreError>;
}

/// Object storage for attachment bytes. Returns the stable public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;
}

/// Identity lookup for rendering counterparts. `Ok(None)` is a valid outcome
/// and callers must handle it; only transport-level failures are errors.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;
}

/// Normalize one loosely-typed store row into a typed `Message`.
///
/// Rows come off the wire as JSON; anything missing a required field, or
/// violating the content invariant (no text and no attachment), is rejected
/// here so untyped data never reaches session logic.
pub fn decode_row(row: &Value) -> Result<Message, StoreError> {
    let message: Message =
        serde_json::from_value(row.clone()).map_err(|e| StoreError::MalformedRow(e.to_string()))?;

    if message.id.is_empty() {
        return Err(StoreError::MalformedRow("empty message id".to_string()));
    }
    if message.sender_id.is_empty() || message.recipient_id.is_empty() {
        return Err(StoreError::MalformedRow(
            "missing participant id".to_string(),
        ));
    }
    if !message.has_content() {
        return Err(StoreError::MalformedRow(format!(
            "message {} has neither text nor attachment",
            message.id
        )));
    }

    Ok(message)
}
