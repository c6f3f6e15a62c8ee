//! Message reconciliation engine
//!
//! Pipeline, run synchronously for every incoming feed event:
//! - `merge` - log batches and live updates are merged into the sequence,
//!   resolving client temporary ids to the permanent ids the log assigns
//! - `order` - the merged sequence is re-sorted along parent references
//! - `pairing` - the ordered sequence is turned into render items, pairing
//!   each tool call with its result
//!
//! Every function here is pure: sequence in, sequence out. The only state
//! carried between calls is the [`TempIdResolutions`] map the caller holds.

mod merge;
mod order;
mod pairing;

pub use merge::{merge_entry, merge_log, merge_stream, LogMerge, StreamMerge, TempIdResolutions};
pub use order::order_by_causal_chain;
pub use pairing::to_render_items;
