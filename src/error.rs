//! Error types for the watch loop and its actions
//!
//! Only [`WatchTransportError`] ends the dispatcher. Everything else is
//! logged where it happens and the loop keeps going.

use std::process::ExitStatus;

use thiserror::Error;

/// The event source itself is gone; watching cannot continue
#[derive(Debug, Error)]
pub enum WatchTransportError {
    #[error("failed to read next event, event stream closed")]
    EventStreamClosed,
}

/// A problem reported on the watcher's error stream
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("fsnotify error: {0}")]
    Notify(#[from] notify::Error),
}

/// The test command could not be started or did not succeed
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("test command is empty")]
    EmptyCommand,
    #[error("failed to start test command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for test command '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("test command '{program}' failed: {status}")]
    Failed { program: String, status: ExitStatus },
}

/// A refresh notice could not be delivered to viewers
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("reload hub is closed")]
    Closed,
}
