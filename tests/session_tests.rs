// Conversation session: reconciliation, ordering, send semantics, read
// receipts, and resync after a delivery gap.

mod common;
use common::{at, fixture, png_attachment, settle, wait_for_history, wire_message};

use anyhow::Result;
use parley::chat::delivery_topic;
use parley::error::{SendError, ValidationError};
use parley::models::ConversationKey;
use parley::store::MessageStore;
use parley::transport::RealtimeTransport;
use parley::{ConversationSession, MessageDraft};

const BUYER: &str = "buyer-1";
const SELLER: &str = "seller-a";

fn profiles() -> Vec<(&'static str, &'static str)> {
    vec![(BUYER, "Ada"), (SELLER, "Stall A")]
}

#[tokio::test]
async fn duplicate_delivery_renders_once() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    let payload = wire_message("m1", SELLER, BUYER, "one copy please", at(0));
    fx.hub.publish(&topic, payload.clone()).await?;
    fx.hub.publish(&topic, payload).await?;

    wait_for_history(&mut events).await?;
    settle().await;

    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m1");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn arrival_order_is_restored_by_timestamp() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    // Deliberately out of creation order.
    fx.hub
        .publish(&topic, wire_message("m3", SELLER, BUYER, "third", at(30)))
        .await?;
    fx.hub
        .publish(&topic, wire_message("m1", SELLER, BUYER, "first", at(10)))
        .await?;
    fx.hub
        .publish(&topic, wire_message("m2", BUYER, SELLER, "second", at(20)))
        .await?;

    wait_for_history(&mut events).await?;
    settle().await;

    let ids: Vec<String> = session.messages().await.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn empty_composer_is_rejected_before_any_network_call() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, _events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    let err = session.send().await.unwrap_err();
    assert!(matches!(
        err,
        SendError::Validation(ValidationError::EmptyMessage)
    ));
    assert_eq!(fx.store.append_count(), 0);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn upload_failure_aborts_send_and_preserves_composer() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, _events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    fx.objects.set_offline(true);
    session.set_draft_text("photo incoming").await;
    session.attach(png_attachment(2_048))?;

    let err = session.send().await.unwrap_err();
    assert!(matches!(err, SendError::Upload(_)));

    // Nothing was appended, and the composer survives for a retry.
    assert_eq!(fx.store.append_count(), 0);
    assert_eq!(session.draft_text(), "photo incoming");
    assert!(session.has_attachment());
    assert!(session.last_send_error().is_some());

    // The retry succeeds once the object store is back.
    fx.objects.set_offline(false);
    session.send().await?;
    assert_eq!(fx.store.append_count(), 1);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn sent_message_arrives_only_through_the_delivery_channel() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    session.set_draft_text("no optimistic insert").await;
    session.send().await?;

    // The composer cleared on success; the rendered copy is the canonical row.
    assert_eq!(session.draft_text(), "");
    wait_for_history(&mut events).await?;

    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, BUYER);
    assert_eq!(messages[0].text_content, "no optimistic insert");

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn store_failure_on_send_preserves_composer() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, _events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    fx.store.set_offline(true);
    session.set_draft_text("try again later").await;
    assert!(session.send().await.is_err());

    assert_eq!(session.draft_text(), "try again later");
    assert!(session.last_send_error().is_some());

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn foreground_delivery_fires_read_receipt() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    let draft = MessageDraft::new(SELLER, BUYER, "seen yet?", None);
    let stored = fx.store.append(draft).await?;
    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    fx.hub.publish(&topic, serde_json::to_value(&stored)?).await?;

    wait_for_history(&mut events).await?;
    settle().await;

    // The receipt landed in the store and the rendered copy mirrors it.
    let key = ConversationKey::new(BUYER, SELLER);
    assert!(fx.store.query_conversation(&key).await?[0].read_flag);
    assert!(session.messages().await[0].read_flag);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn backgrounded_session_leaves_messages_unread() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;
    session.set_foreground(false).await;

    // The row exists durably and its copy fans out on the topic.
    let draft = MessageDraft::new(SELLER, BUYER, "while you were away", None);
    let stored = fx.store.append(draft).await?;
    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    fx.hub.publish(&topic, serde_json::to_value(&stored)?).await?;

    wait_for_history(&mut events).await?;
    settle().await;

    let key = ConversationKey::new(BUYER, SELLER);
    assert!(!fx.store.query_conversation(&key).await?[0].read_flag);

    // Foregrounding renders the backlog and drains it.
    session.set_foreground(true).await;
    settle().await;
    assert!(fx.store.query_conversation(&key).await?[0].read_flag);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn cross_talk_on_the_topic_is_discarded() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    // A row between unrelated participants must never render here.
    fx.hub
        .publish(&topic, wire_message("x1", "mallory", BUYER, "intrusion", at(0)))
        .await?;
    fx.hub
        .publish(&topic, wire_message("m1", SELLER, BUYER, "legitimate", at(10)))
        .await?;

    wait_for_history(&mut events).await?;
    settle().await;

    let ids: Vec<String> = session.messages().await.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1"]);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn closed_session_rejects_send() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, _events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    session.close().await;
    session.set_draft_text("too late").await;
    assert!(matches!(session.send().await.unwrap_err(), SendError::Closed));
    Ok(())
}

#[tokio::test]
async fn resync_recovers_messages_missed_during_a_gap() -> Result<()> {
    let fx = fixture(&profiles());
    let (mut session, _events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    // Appended while the channel was down: durable, but never published.
    let draft = MessageDraft::new(SELLER, BUYER, "sent into the void", None);
    let stored = fx.store.append(draft).await?;

    assert!(session.messages().await.is_empty());

    session.resync().await?;
    settle().await;

    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, stored.id);
    // Recovered rows are rendered like any other, receipts included.
    assert!(messages[0].read_flag);

    session.close().await;
    Ok(())
}

#[tokio::test]
async fn counterpart_without_profile_still_converses() -> Result<()> {
    // Only the buyer has a profile; the session still opens and renders the
    // counterpart by raw id.
    let fx = fixture(&[(BUYER, "Ada")]);
    let (mut session, mut events) = ConversationSession::open(&fx.ctx, BUYER, SELLER).await?;

    assert_eq!(session.counterpart_name(), SELLER);

    let topic = delivery_topic(&ConversationKey::new(BUYER, SELLER));
    fx.hub
        .publish(&topic, wire_message("m1", SELLER, BUYER, "hi", at(0)))
        .await?;
    wait_for_history(&mut events).await?;

    assert_eq!(session.messages().await.len(), 1);
    session.close().await;
    Ok(())
}
