use thiserror::Error;

/// Failures talking to the durable message store or the object store.
/// All variants are transient from the caller's point of view: the operation
/// may be retried and no local state has been corrupted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("no such message: {0}")]
    UnknownMessage(String),

    #[error("malformed message row: {0}")]
    MalformedRow(String),
}

/// Failures on the real-time pub/sub substrate.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("subscribe failed on topic {0}")]
    SubscribeFailed(String),

    #[error("publish failed on topic {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("channel closed on topic {0}")]
    ChannelClosed(String),
}

/// Composer-side rejections. These fire before any network call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message must contain text or an attachment")]
    EmptyMessage,

    #[error("attachment is not an image: {0}")]
    NotAnImage(String),

    #[error("attachment too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Why a send did not complete. The composer contents are preserved in every
/// case so the user can retry.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("attachment upload failed: {0}")]
    Upload(StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("conversation is closed")]
    Closed,
}

/// Failures opening or resynchronizing a conversation session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("conversation is closed")]
    Closed,
}
