// Scripted buyer↔seller conversation over the in-memory backends. Exercises
// the whole core end to end: directory, session lifecycle, typing, an image
// attachment, and read receipts, with the wire traffic logged as it happens.

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use log::{info, LevelFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use parley::chat::attachments::AttachmentSource;
use parley::chat::{delivery_topic, ChatContext, ConversationDirectory, ConversationSession};
use parley::config::ChatConfig;
use parley::models::ConversationKey;
use parley::store::{InMemoryMessageStore, InMemoryObjectStore, StaticProfiles};
use parley::transport::{InMemoryHub, RealtimeTransport};
use parley::utils::setup_logging;
use parley::SessionEvent;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "parley demo: a scripted buyer/seller conversation over in-memory backends"
)]
struct Args {
    /// Buyer participant id
    #[arg(long, default_value = "buyer-ada")]
    buyer: String,

    /// Seller participant id
    #[arg(long, default_value = "seller-finch")]
    seller: String,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.log_file.as_deref(), LevelFilter::Info)?;

    let store = Arc::new(InMemoryMessageStore::new());
    let objects = Arc::new(InMemoryObjectStore::new());
    let profiles = Arc::new(
        StaticProfiles::new()
            .with_profile(&args.buyer, "Ada")
            .with_profile(&args.seller, "Finch's Stall"),
    );
    let hub = Arc::new(InMemoryHub::new());

    let ctx = ChatContext::new(
        store.clone(),
        objects.clone(),
        profiles,
        hub.clone(),
        ChatConfig::default(),
    );

    // Tap the delivery topic and log rows as they fan out.
    let key = ConversationKey::new(&args.buyer, &args.seller);
    let tap = hub.subscribe(&delivery_topic(&key)).await?;
    tokio::spawn(async move {
        let mut events = tap.into_stream();
        while let Some(event) = events.next().await {
            info!("wire {}: {}", event.topic, event.payload);
        }
    });

    // The buyer opens the thread and asks about a listing; the seller is not
    // looking at the conversation yet.
    let (mut buyer, mut buyer_events) =
        ConversationSession::open(&ctx, &args.buyer, &args.seller).await?;

    buyer
        .set_draft_text("Hi! Is the walnut desk still available?")
        .await;
    buyer.send().await?;
    wait_for_history(&mut buyer_events).await?;

    // Before the seller opens the thread, the directory counts it unread.
    let mut seller_directory = ConversationDirectory::new(&ctx);
    let previews = seller_directory.refresh(&args.seller).await?;
    for preview in previews {
        println!(
            "[directory] {} — \"{}\" ({} unread)",
            preview.counterpart_name, preview.last_message_preview, preview.unread_count
        );
    }

    // Opening the conversation renders the message and fires the receipt.
    let (mut seller, mut seller_events) =
        ConversationSession::open(&ctx, &args.seller, &args.buyer).await?;

    seller.set_draft_text("It is — picking it up this week?").await;
    seller.send().await?;
    wait_for_history(&mut seller_events).await?;
    wait_for_history(&mut buyer_events).await?;

    // The buyer answers with a photo only, no text.
    buyer.attach(AttachmentSource {
        file_name: "stairwell.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0u8; 2_048],
    })?;
    buyer.send().await?;
    wait_for_history(&mut seller_events).await?;

    println!("\n[{}] transcript with {}:", args.seller, seller.counterpart_name());
    for message in seller.messages().await {
        let body = if message.text_content.is_empty() {
            message
                .attachment_ref
                .as_ref()
                .map(|a| a.url.clone())
                .unwrap_or_default()
        } else {
            message.text_content.clone()
        };
        println!(
            "  {:<14} {} {}",
            message.sender_id,
            if message.read_flag { "✓" } else { " " },
            body
        );
    }

    let previews = seller_directory.refresh(&args.seller).await?;
    for preview in previews {
        println!(
            "[directory] {} — \"{}\" ({} unread)",
            preview.counterpart_name, preview.last_message_preview, preview.unread_count
        );
    }

    buyer.close().await;
    seller.close().await;
    info!("demo finished, {} objects uploaded", objects.object_count());
    Ok(())
}

async fn wait_for_history(events: &mut mpsc::Receiver<SessionEvent>) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == SessionEvent::HistoryChanged {
                return Ok(());
            }
        }
        Err(anyhow::anyhow!("session event channel closed"))
    })
    .await?
}
