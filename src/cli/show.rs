//! Show command implementation

use anyhow::Result;

use crate::model::{Content, ContentBlock, RenderItem, RenderItemKind, ThinkingStatus, ToolStatus};
use crate::store::SnapshotStore;

const PREVIEW_CHARS: usize = 200;

pub fn run(store: &SnapshotStore, query: &str, full: bool, json: bool) -> Result<()> {
    let Some(session) = store.get_session(query)? else {
        println!("Session '{}' not found. Run 'threadline replay' first.", query);
        return Ok(());
    };

    let Some(mut conversation) = store.load_conversation(&session.id)? else {
        println!("No snapshot stored for {}.", session.id);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(conversation.render_items())?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    println!("Session: {} ({})", session.external_id, session.feed_id);
    println!(
        "Messages: {} | Resolved temp ids: {}",
        session.message_count, session.resolution_count
    );
    println!("{}", "=".repeat(80));

    print_items(conversation.render_items(), full);
    Ok(())
}

/// Print render items in reading order
pub fn print_items(items: &[RenderItem], full: bool) {
    if items.is_empty() {
        println!("\nNothing to render (this may be an empty session).");
        return;
    }

    for item in items {
        match &item.kind {
            RenderItemKind::UserPrompt { content } => {
                println!("\n[USER] {}", clip(&content_text(content), full));
            }
            RenderItemKind::Text { text } => {
                println!("\n[ASSISTANT] {}", clip(text, full));
            }
            RenderItemKind::Thinking { thinking, status } => {
                let marker = match status {
                    ThinkingStatus::Streaming => " (streaming)",
                    ThinkingStatus::Complete => "",
                };
                println!("  💭 {}{}", clip(thinking, full), marker);
            }
            RenderItemKind::ToolCall(call) => {
                let icon = match call.status {
                    ToolStatus::Pending => "⏳",
                    ToolStatus::Complete => "🔧",
                    ToolStatus::Error => "❌",
                    ToolStatus::Aborted => "⛔",
                };
                println!("  {} {} [{}]", icon, call.tool_name, call.status.as_str());
                if full {
                    println!("     input: {}", call.tool_input);
                }
                if let Some(result) = &call.tool_result {
                    println!("     → {}", clip(&result.content.to_text(), full));
                }
            }
        }
    }
}

fn content_text(content: &Content) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn clip(text: &str, full: bool) -> String {
    if full || text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{}...", head)
}
