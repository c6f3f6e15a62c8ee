//! Threadline: reconciles live and logged conversation messages into one
//! causally ordered sequence of render items.

pub mod cli;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod feed;
pub mod model;
pub mod store;

pub use config::Config;
pub use conversation::Conversation;
pub use feed::{FeedRegistry, LiveFeed};
pub use store::SnapshotStore;
