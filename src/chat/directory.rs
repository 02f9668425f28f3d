// Conversation directory: turns the flat message log into per-counterpart
// threads with previews and unread counts. Derived on demand; the only thing
// kept between refreshes is the last successful snapshot, so the UI has
// something to show when the store is unreachable.

use log::{debug, warn};
use std::collections::HashMap;

use crate::chat::ChatContext;
use crate::error::StoreError;
use crate::models::{ConversationPreview, Message};
use crate::store::{MessageStore, ProfileResolver};
use std::sync::Arc;

const PHOTO_PLACEHOLDER: &str = "[photo]";

pub struct ConversationDirectory {
    store: Arc<dyn MessageStore>,
    profiles: Arc<dyn ProfileResolver>,
    preview_chars: usize,
    last: Option<Vec<ConversationPreview>>,
}

impl ConversationDirectory {
    pub fn new(ctx: &ChatContext) -> Self {
        ConversationDirectory {
            store: ctx.store.clone(),
            profiles: ctx.profiles.clone(),
            preview_chars: ctx.config.preview_chars,
            last: None,
        }
    }

    /// Rebuild the thread list for `current_user`.
    ///
    /// On store failure the error is returned and the previous snapshot stays
    /// available via `cached()`. A counterpart whose profile does not resolve
    /// is dropped from the list rather than rendered as an unknown.
    pub async fn refresh(
        &mut self,
        current_user: &str,
    ) -> Result<&[ConversationPreview], StoreError> {
        let messages = self.store.query_involving(current_user).await?;

        // Messages arrive newest-first, so the first message seen per
        // counterpart is the thread's latest, and first-seen order is already
        // the final ordering (last activity, descending).
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Message> = HashMap::new();
        let mut unread: HashMap<String, usize> = HashMap::new();

        for message in messages {
            let counterpart = match message.key().counterpart_of(current_user) {
                Some(id) => id.to_string(),
                None => continue,
            };
            if !latest.contains_key(&counterpart) {
                order.push(counterpart.clone());
                latest.insert(counterpart.clone(), message.clone());
            }
            if message.recipient_id == current_user && !message.read_flag {
                *unread.entry(counterpart).or_insert(0) += 1;
            }
        }

        let mut previews = Vec::with_capacity(order.len());
        for counterpart in order {
            let profile = match self.profiles.profile(&counterpart).await? {
                Some(profile) => profile,
                None => {
                    warn!(
                        "dropping conversation with {}: no resolvable profile",
                        counterpart
                    );
                    continue;
                }
            };
            let last_message = &latest[&counterpart];
            previews.push(ConversationPreview {
                counterpart_id: counterpart.clone(),
                counterpart_name: profile.display_name,
                counterpart_avatar: profile.avatar_url,
                last_message_preview: preview_text(last_message, self.preview_chars),
                last_message_at: last_message.created_at,
                unread_count: unread.get(&counterpart).copied().unwrap_or(0),
            });
        }

        debug!(
            "directory for {} holds {} conversations",
            current_user,
            previews.len()
        );
        self.last = Some(previews);
        Ok(self.last.as_deref().unwrap_or(&[]))
    }

    /// The last successful snapshot, if any refresh has succeeded.
    pub fn cached(&self) -> Option<&[ConversationPreview]> {
        self.last.as_deref()
    }
}

fn preview_text(message: &Message, limit: usize) -> String {
    if message.text_content.is_empty() {
        return PHOTO_PLACEHOLDER.to_string();
    }
    let mut preview: String = message.text_content.chars().take(limit).collect();
    if message.text_content.chars().count() > limit {
        preview.push('…');
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentRef;
    use chrono::Utc;

    fn message_with(text: &str, attachment: bool) -> Message {
        Message {
            id: "m1".to_string(),
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            text_content: text.to_string(),
            attachment_ref: attachment.then(|| AttachmentRef {
                url: "mem://a/x.png".to_string(),
            }),
            created_at: Utc::now(),
            read_flag: false,
        }
    }

    #[test]
    fn preview_truncates_long_text() {
        let message = message_with("a marketplace question that runs long", false);
        assert_eq!(preview_text(&message, 10), "a marketpl…");
    }

    #[test]
    fn preview_keeps_short_text_intact() {
        let message = message_with("hi", false);
        assert_eq!(preview_text(&message, 10), "hi");
    }

    #[test]
    fn attachment_only_message_gets_placeholder() {
        let message = message_with("", true);
        assert_eq!(preview_text(&message, 10), PHOTO_PLACEHOLDER);
    }
}
