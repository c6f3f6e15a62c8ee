//! Command implementations for the `threadline` binary

pub mod feeds;
pub mod replay;
pub mod resolutions;
pub mod sessions;
pub mod show;
