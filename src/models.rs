use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unordered pair of participants that implicitly defines a conversation.
///
/// The pair is canonicalized on construction (lexicographic order), so the
/// same two users always produce the same key and the same channel topics
/// regardless of who opened the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    first: String,
    second: String,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            ConversationKey {
                first: a.to_string(),
                second: b.to_string(),
            }
        } else {
            ConversationKey {
                first: b.to_string(),
                second: a.to_string(),
            }
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.first == user_id || self.second == user_id
    }

    /// The other end of the conversation, or None if `user_id` is not a member.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.first == user_id {
            Some(&self.second)
        } else if self.second == user_id {
            Some(&self.first)
        } else {
            None
        }
    }

    /// True when `sender` and `recipient` are exactly this pair (either direction).
    pub fn matches(&self, sender_id: &str, recipient_id: &str) -> bool {
        (self.first == sender_id && self.second == recipient_id)
            || (self.first == recipient_id && self.second == sender_id)
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }
}

/// Stable public reference to an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
}

/// One row of the conversation log. Immutable once appended, except for
/// `read_flag` which the recipient flips exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text_content: String,
    pub attachment_ref: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub read_flag: bool,
}

impl Message {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.sender_id, &self.recipient_id)
    }

    /// A message must carry text, an attachment, or both.
    pub fn has_content(&self) -> bool {
        !self.text_content.is_empty() || self.attachment_ref.is_some()
    }
}

/// What a session hands to the store. The store assigns `created_at`; the id
/// is assigned here so deduplication is stable across every echo path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text_content: String,
    pub attachment_ref: Option<AttachmentRef>,
}

impl MessageDraft {
    pub fn new(
        sender_id: &str,
        recipient_id: &str,
        text_content: &str,
        attachment_ref: Option<AttachmentRef>,
    ) -> Self {
        MessageDraft {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            text_content: text_content.to_string(),
            attachment_ref,
        }
    }
}

/// Resolved identity of a counterpart, as rendered in thread lists and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// One entry in the conversation directory, derived from the message log on
/// demand and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPreview {
    pub counterpart_id: String,
    pub counterpart_name: String,
    pub counterpart_avatar: Option<String>,
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: usize,
}

/// Ephemeral per-member state carried on the presence channel. Absence of a
/// member (leave, disconnect, expiry) always reads as not typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub typing: bool,
}

impl PresenceState {
    pub fn typing(is_typing: bool) -> Self {
        PresenceState { typing: is_typing }
    }
}
