//! Feeds command implementation

use anyhow::Result;

use crate::config::Config;
use crate::feed::FeedRegistry;

pub fn run(config: &Config, registry: &FeedRegistry) -> Result<()> {
    let feeds = registry.all_feeds();

    if feeds.is_empty() {
        println!("No feeds enabled. Check your configuration.");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<10} {}", "Feed", "Status", "Available", "Description");
    println!("{}", "-".repeat(72));

    for feed in feeds {
        println!(
            "{:<20} {:<10} {:<10} {}",
            feed.id(),
            config.feed_status(feed.id()).unwrap_or("active"),
            if feed.is_available() { "yes" } else { "no" },
            feed.description(),
        );
    }

    Ok(())
}
