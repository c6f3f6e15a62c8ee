//! Resolutions command implementation

use anyhow::Result;

use crate::store::SnapshotStore;

pub fn run(store: &SnapshotStore, query: &str) -> Result<()> {
    let Some(session) = store.get_session(query)? else {
        println!("Session '{}' not found. Run 'threadline replay' first.", query);
        return Ok(());
    };

    let resolutions = store.get_resolutions(&session.id)?;
    if resolutions.is_empty() {
        println!("No temporary ids resolved in {}.", session.id);
        return Ok(());
    }

    println!("{:<44} {}", "Temporary id", "Permanent id");
    println!("{}", "-".repeat(88));
    for (temp_id, permanent_id) in resolutions.iter() {
        println!("{:<44} {}", temp_id, permanent_id);
    }

    Ok(())
}
