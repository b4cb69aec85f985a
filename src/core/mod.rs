//! Core functionality module
//!
//! Contains change events, path matching and the file watcher bridge

pub mod events;
pub mod matcher;
pub mod watcher;

// Re-export main types
pub use events::{ActionKind, ActionRequest, ChangeEvent, ChangeOp};
pub use matcher::{classify, PathMatcher, Screenshot};
pub use watcher::{FileWatcher, WatchStreams};
