// parley: the conversation core of a marketplace. Buyer↔seller messaging
// with a per-counterpart directory, real-time delivery, typing presence,
// image attachments, and read receipts, over pluggable store and transport
// backends.

pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export the main surface for convenience
pub use chat::{ChatContext, ConversationDirectory, ConversationSession, SessionEvent, SessionState};
pub use models::{
    AttachmentRef, ConversationKey, ConversationPreview, Message, MessageDraft, PresenceState,
    Profile,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_key_is_order_independent() {
        let a = ConversationKey::new("buyer-1", "seller-9");
        let b = ConversationKey::new("seller-9", "buyer-1");

        assert_eq!(a, b);
        assert_eq!(chat::delivery_topic(&a), chat::delivery_topic(&b));
        assert_eq!(chat::presence_topic(&a), chat::presence_topic(&b));

        // The two topics must never collide with each other
        assert_ne!(chat::delivery_topic(&a), chat::presence_topic(&a));
    }

    #[test]
    fn conversation_key_membership() {
        let key = ConversationKey::new("buyer-1", "seller-9");

        assert!(key.contains("buyer-1"));
        assert!(key.contains("seller-9"));
        assert!(!key.contains("admin-0"));

        assert_eq!(key.counterpart_of("buyer-1"), Some("seller-9"));
        assert_eq!(key.counterpart_of("seller-9"), Some("buyer-1"));
        assert_eq!(key.counterpart_of("admin-0"), None);

        assert!(key.matches("buyer-1", "seller-9"));
        assert!(key.matches("seller-9", "buyer-1"));
        assert!(!key.matches("buyer-1", "admin-0"));
    }

    #[test]
    fn decode_row_rejects_contentless_message() {
        let row = json!({
            "id": "m1",
            "sender_id": "buyer-1",
            "recipient_id": "seller-9",
            "text_content": "",
            "attachment_ref": null,
            "created_at": "2024-05-01T12:00:00Z",
            "read_flag": false,
        });

        let err = store::decode_row(&row).unwrap_err();
        assert!(matches!(err, error::StoreError::MalformedRow(_)));
    }

    #[test]
    fn decode_row_accepts_attachment_only_message() {
        let row = json!({
            "id": "m2",
            "sender_id": "buyer-1",
            "recipient_id": "seller-9",
            "text_content": "",
            "attachment_ref": { "url": "mem://buyer-1/x.png" },
            "created_at": "2024-05-01T12:00:00Z",
            "read_flag": false,
        });

        let message = store::decode_row(&row).unwrap();
        assert!(message.text_content.is_empty());
        assert!(message.attachment_ref.is_some());
    }

    #[test]
    fn decode_row_rejects_untyped_shapes() {
        // A row missing required fields must not propagate past the adapter.
        let row = json!({ "id": "m3", "body": "free-form shape" });
        assert!(store::decode_row(&row).is_err());
    }

    #[test]
    fn default_config_matches_product_limits() {
        let config = config::ChatConfig::default();
        assert_eq!(config.typing_idle_ms, 3_000);
        assert_eq!(config.max_attachment_bytes, 5 * 1024 * 1024);
    }
}
