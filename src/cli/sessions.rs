//! Sessions command implementation

use anyhow::Result;

use crate::feed::FeedRegistry;
use crate::store::SnapshotStore;

pub fn run(store: &SnapshotStore, registry: &FeedRegistry, feed: Option<String>) -> Result<()> {
    let feeds: Vec<_> = registry
        .available_feeds()
        .into_iter()
        .filter(|f| feed.as_deref().map_or(true, |id| f.id() == id))
        .collect();

    if feeds.is_empty() {
        println!("No feeds available. Run 'threadline feeds' to check your configuration.");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:>8} {:>10} {}",
        "Session", "Feed", "Messages", "Line", "Updated"
    );
    println!("{}", "-".repeat(100));

    let mut total = 0;
    for feed in feeds {
        for session in feed.discover()? {
            let stored = store.get_session(&format!("{}:{}", feed.id(), session.id))?;

            let (messages, line, updated) = match &stored {
                Some(row) => (
                    row.message_count.to_string(),
                    row.cursor
                        .map(|c| c.line_number.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    row.updated_at.clone().unwrap_or_else(|| "-".to_string()),
                ),
                None => ("-".to_string(), "-".to_string(), "never replayed".to_string()),
            };

            println!(
                "{:<38} {:<20} {:>8} {:>10} {}",
                session.id,
                feed.id(),
                messages,
                line,
                updated
            );
            total += 1;
        }
    }

    println!("\nTotal: {} sessions", total);
    Ok(())
}
