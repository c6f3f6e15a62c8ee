//! Replay command implementation

use anyhow::Result;
use tracing::info;

use super::show::print_items;
use crate::conversation::Conversation;
use crate::feed::FeedRegistry;
use crate::store::SnapshotStore;

pub fn run(
    store: &SnapshotStore,
    registry: &FeedRegistry,
    query: &str,
    fresh: bool,
    full: bool,
    json: bool,
) -> Result<()> {
    let Some((feed, session)) = registry.find_session(query)? else {
        println!("Session '{}' not found in any available feed.", query);
        return Ok(());
    };

    let session_id = format!("{}:{}", feed.id(), session.id);
    let mut conversation = if fresh {
        Conversation::new()
    } else {
        store.load_conversation(&session_id)?.unwrap_or_default()
    };

    let resume = conversation.cursor();
    let subscription = feed.subscribe(&session, resume, &mut conversation)?;
    info!(
        session = %session_id,
        delivered = subscription.delivered,
        dropped = subscription.dropped,
        line = subscription.cursor.line_number,
        "replay finished"
    );

    store.upsert_session(feed.id(), &session, &conversation)?;
    store.save_conversation(&session_id, &conversation)?;

    if json {
        println!("{}", serde_json::to_string_pretty(conversation.render_items())?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    println!("Session: {} ({})", session.id, feed.id());
    println!(
        "Events: {} delivered, {} dropped | Messages: {} | Resolved temp ids: {}",
        subscription.delivered,
        subscription.dropped,
        conversation.messages().len(),
        conversation.resolutions().len()
    );
    println!("{}", "=".repeat(80));

    print_items(conversation.render_items(), full);
    Ok(())
}
