// Conversation session: everything that happens while one conversation is
// open. Owns the rendered message list, the composer, both real-time
// channels, and the typing publisher; nothing here lives in ambient state.
//
// The sender never inserts its own message optimistically. The canonical row
// comes back through the delivery channel for both participants, so the two
// rendered histories converge on identical content by construction.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::chat::attachments::{self, AttachmentSource, PendingAttachment};
use crate::chat::delivery::DeliveryChannel;
use crate::chat::presence::PresenceChannel;
use crate::chat::typing::TypingPublisher;
use crate::chat::{presence_topic, ChatContext};
use crate::error::{SendError, SessionError, ValidationError};
use crate::models::{ConversationKey, Message, MessageDraft, Profile};
use crate::store::MessageStore;
use crate::transport::RealtimeTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Ready,
    Sending,
    Closed,
}

/// What the surrounding UI hears from a session, delivered over the receiver
/// returned by `open`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The rendered list changed: a new row arrived or read flags moved.
    HistoryChanged,
    /// The counterpart started or stopped typing.
    TypingChanged(bool),
    /// The counterpart joined or left the conversation's presence topic.
    PeerPresenceChanged(bool),
}

struct Composer {
    text: String,
    attachment: Option<PendingAttachment>,
}

impl Composer {
    fn release_attachment(&mut self) {
        if let Some(mut pending) = self.attachment.take() {
            pending.preview.release();
        }
    }
}

// State shared between the session handle and its event pump.
struct SessionShared {
    self_id: String,
    counterpart_id: String,
    store: Arc<dyn MessageStore>,
    messages: Mutex<Vec<Message>>,
    foreground: AtomicBool,
    peer_typing: AtomicBool,
    peer_online: AtomicBool,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionShared {
    /// Merge one inbound row into the rendered list. Duplicate ids are
    /// ignored, which makes at-least-once delivery safe to consume.
    async fn reconcile(&self, mut message: Message) {
        let mut list = self.messages.lock().await;
        if list.iter().any(|m| m.id == message.id) {
            debug!("duplicate delivery of {} ignored", message.id);
            return;
        }

        let addressed_to_us = message.recipient_id == self.self_id && !message.read_flag;
        if addressed_to_us && self.foreground.load(Ordering::SeqCst) {
            // Rendered in an open, foregrounded conversation: the read
            // receipt fires now, and the local copy mirrors it.
            message.read_flag = true;
            self.spawn_read_receipt(message.id.clone());
        }

        list.push(message);
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        drop(list);

        self.notify(SessionEvent::HistoryChanged);
    }

    /// Flip every unread inbound row to read. Runs when the baseline history
    /// is first rendered and again whenever the session is foregrounded.
    async fn mark_rendered_read(&self) {
        let mut list = self.messages.lock().await;
        let mut flipped = false;
        for message in list.iter_mut() {
            if message.recipient_id == self.self_id && !message.read_flag {
                message.read_flag = true;
                flipped = true;
                self.spawn_read_receipt(message.id.clone());
            }
        }
        drop(list);

        if flipped {
            self.notify(SessionEvent::HistoryChanged);
        }
    }

    // Read state is best effort: the write happens off the rendering path and
    // a failure is logged, never surfaced.
    fn spawn_read_receipt(&self, message_id: String) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.mark_read(&message_id).await {
                warn!("read receipt for {} failed: {}", message_id, e);
            }
        });
    }

    fn notify(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            debug!("session event dropped, receiver gone or backlogged");
        }
    }
}

pub struct ConversationSession {
    ctx: ChatContext,
    key: ConversationKey,
    self_id: String,
    counterpart_id: String,
    counterpart_profile: Option<Profile>,
    shared: Arc<SessionShared>,
    composer: Composer,
    typing: TypingPublisher,
    state: SessionState,
    last_send_error: Option<String>,
    pump: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ConversationSession {
    /// Open a conversation with `counterpart_id`: fetch the baseline history,
    /// subscribe both channels, announce presence, and start the event pump.
    /// The returned receiver carries `SessionEvent`s until the session closes.
    ///
    /// A counterpart without a resolvable profile is still a valid
    /// conversation; only its display name falls back to the raw id.
    pub async fn open(
        ctx: &ChatContext,
        self_id: &str,
        counterpart_id: &str,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        let key = ConversationKey::new(self_id, counterpart_id);
        info!("opening conversation {} <-> {}", self_id, counterpart_id);

        let counterpart_profile = match ctx.profiles.profile(counterpart_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("profile lookup for {} failed: {}", counterpart_id, e);
                None
            }
        };

        let baseline = ctx.store.query_conversation(&key).await?;
        debug!("fetched {} messages of history", baseline.len());

        let (delivery, presence) = Self::open_channels(ctx, &key, self_id).await?;

        let (events_tx, events_rx) = mpsc::channel(ctx.config.channel_capacity);
        let shared = Arc::new(SessionShared {
            self_id: self_id.to_string(),
            counterpart_id: counterpart_id.to_string(),
            store: ctx.store.clone(),
            messages: Mutex::new(baseline),
            foreground: AtomicBool::new(true),
            peer_typing: AtomicBool::new(false),
            peer_online: AtomicBool::new(false),
            events: events_tx,
        });

        // The baseline is on screen now; unread inbound rows get receipts.
        shared.mark_rendered_read().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(run_pump(
            shared.clone(),
            ctx.transport.clone(),
            delivery,
            presence,
            shutdown_rx,
        ));

        let typing = TypingPublisher::new(
            ctx.transport.clone(),
            presence_topic(&key),
            self_id.to_string(),
            ctx.config.typing_idle(),
        );

        Ok((
            ConversationSession {
                ctx: ctx.clone(),
                key,
                self_id: self_id.to_string(),
                counterpart_id: counterpart_id.to_string(),
                counterpart_profile,
                shared,
                composer: Composer {
                    text: String::new(),
                    attachment: None,
                },
                typing,
                state: SessionState::Ready,
                last_send_error: None,
                pump: Some(pump),
                shutdown: shutdown_tx,
            },
            events_rx,
        ))
    }

    async fn open_channels(
        ctx: &ChatContext,
        key: &ConversationKey,
        self_id: &str,
    ) -> Result<(DeliveryChannel, PresenceChannel), SessionError> {
        let delivery = DeliveryChannel::open(&*ctx.transport, key).await?;
        let presence = PresenceChannel::join(&*ctx.transport, key, self_id).await?;
        Ok((delivery, presence))
    }

    /// Replace the composer text and drive the typing indicator.
    pub async fn set_draft_text(&mut self, text: &str) {
        self.composer.text = text.to_string();
        self.typing.input_changed(text.is_empty()).await;
    }

    pub fn draft_text(&self) -> &str {
        &self.composer.text
    }

    /// Select an attachment, replacing (and releasing) any previous one.
    /// Validation runs here, before any network call.
    pub fn attach(&mut self, source: AttachmentSource) -> Result<(), ValidationError> {
        attachments::validate(&source, self.ctx.config.max_attachment_bytes)?;
        self.composer.release_attachment();
        self.composer.attachment = Some(PendingAttachment::new(source));
        Ok(())
    }

    pub fn clear_attachment(&mut self) {
        self.composer.release_attachment();
    }

    pub fn has_attachment(&self) -> bool {
        self.composer.attachment.is_some()
    }

    /// Send the composer contents.
    ///
    /// The attachment, when present, is uploaded to completion before the
    /// message is appended; an upload failure aborts the send with nothing
    /// written. On any failure the composer is preserved for retry. On
    /// success the composer clears and the typing indicator drops; the sent
    /// row reaches the rendered list through the delivery channel only.
    pub async fn send(&mut self) -> Result<(), SendError> {
        if self.state == SessionState::Closed {
            return Err(SendError::Closed);
        }
        if self.composer.text.trim().is_empty() && self.composer.attachment.is_none() {
            return Err(ValidationError::EmptyMessage.into());
        }

        self.state = SessionState::Sending;

        let attachment_ref = match &self.composer.attachment {
            Some(pending) => {
                match attachments::upload(&*self.ctx.objects, &self.self_id, &pending.source).await
                {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        error!("attachment upload failed: {}", e);
                        self.state = SessionState::Ready;
                        self.last_send_error = Some(e.to_string());
                        return Err(SendError::Upload(e));
                    }
                }
            }
            None => None,
        };

        let draft = MessageDraft::new(
            &self.self_id,
            &self.counterpart_id,
            self.composer.text.trim(),
            attachment_ref,
        );
        let stored = match self.ctx.store.append(draft).await {
            Ok(message) => message,
            Err(e) => {
                error!("send to {} failed: {}", self.counterpart_id, e);
                self.state = SessionState::Ready;
                self.last_send_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        if let Err(e) = DeliveryChannel::publish(&*self.ctx.transport, &self.key, &stored).await {
            // The row is durable; a resync recovers it on either side.
            warn!("publish of {} failed: {}", stored.id, e);
        }

        self.composer.release_attachment();
        self.composer.text.clear();
        self.typing.input_changed(true).await;

        self.last_send_error = None;
        self.state = SessionState::Ready;
        info!("sent {} to {}", stored.id, self.counterpart_id);
        Ok(())
    }

    /// Foreground gating for read receipts: a backgrounded session leaves
    /// inbound rows unread for the directory to count; foregrounding renders
    /// them and issues the receipts.
    pub async fn set_foreground(&mut self, foreground: bool) {
        self.shared.foreground.store(foreground, Ordering::SeqCst);
        if foreground {
            self.shared.mark_rendered_read().await;
        }
    }

    /// Re-establish both channels and close the delivery gap.
    ///
    /// The subscription alone cannot replay what was missed, so after
    /// resubscribing (with jittered backoff between attempts) the whole
    /// history is fetched again and reconciled row by row.
    pub async fn resync(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        info!("resyncing conversation with {}", self.counterpart_id);

        let _ = self.shutdown.send(true);
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        let mut attempt = 1;
        let (delivery, presence) = loop {
            match Self::open_channels(&self.ctx, &self.key, &self.self_id).await {
                Ok(channels) => break channels,
                Err(e) if attempt < self.ctx.config.resync_attempts => {
                    let backoff = crate::utils::retry_backoff(attempt);
                    warn!(
                        "resync attempt {} failed ({}), retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let history = self.ctx.store.query_conversation(&self.key).await?;
        for message in history {
            self.shared.reconcile(message).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = shutdown_tx;
        self.pump = Some(tokio::spawn(run_pump(
            self.shared.clone(),
            self.ctx.transport.clone(),
            delivery,
            presence,
            shutdown_rx,
        )));
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Tear the session down: withdraw typing, stop the pump (which departs
    /// presence and closes delivery), and release any pending preview.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("closing conversation with {}", self.counterpart_id);
        self.state = SessionState::Closed;

        self.typing.stop().await;
        let _ = self.shutdown.send(true);
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        self.composer.release_attachment();
        self.composer.text.clear();
    }

    /// Snapshot of the rendered history, ascending by `(created_at, id)`.
    pub async fn messages(&self) -> Vec<Message> {
        self.shared.messages.lock().await.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_typing(&self) -> bool {
        self.shared.peer_typing.load(Ordering::SeqCst)
    }

    pub fn peer_online(&self) -> bool {
        self.shared.peer_online.load(Ordering::SeqCst)
    }

    pub fn counterpart_id(&self) -> &str {
        &self.counterpart_id
    }

    pub fn counterpart_name(&self) -> &str {
        self.counterpart_profile
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(&self.counterpart_id)
    }

    pub fn last_send_error(&self) -> Option<&str> {
        self.last_send_error.as_deref()
    }
}

// The single event pump of a session: merges delivery rows and presence
// updates until shutdown or until a channel dies. Channel death is not
// retried here; recovery is an explicit `resync`.
async fn run_pump(
    shared: Arc<SessionShared>,
    transport: Arc<dyn RealtimeTransport>,
    mut delivery: DeliveryChannel,
    mut presence: PresenceChannel,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = delivery.next_message() => match message {
                Some(message) => shared.reconcile(message).await,
                None => {
                    debug!("delivery channel for {} closed", shared.counterpart_id);
                    break;
                }
            },
            update = presence.next_peer_update() => match update {
                Some(update) if update.member == shared.counterpart_id => {
                    let was_typing = shared.peer_typing.swap(update.typing, Ordering::SeqCst);
                    let was_online = shared.peer_online.swap(update.online, Ordering::SeqCst);
                    if was_typing != update.typing {
                        shared.notify(SessionEvent::TypingChanged(update.typing));
                    }
                    if was_online != update.online {
                        shared.notify(SessionEvent::PeerPresenceChanged(update.online));
                    }
                }
                Some(_) => {}
                None => {
                    debug!("presence channel for {} closed", shared.counterpart_id);
                    break;
                }
            },
        }
    }

    presence.depart(&*transport).await;
    delivery.close();
}
