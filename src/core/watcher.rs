use std::path::Path;

use anyhow::{Context, Result};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::events::{ChangeEvent, ChangeOp};
use crate::config::WatchedDirectory;
use crate::error::WatchError;

/// Receiving ends of a running watcher
pub struct WatchStreams {
    pub events: UnboundedReceiver<ChangeEvent>,
    pub errors: UnboundedReceiver<WatchError>,
}

/// Keeps the OS watcher alive. Dropping it stops watching and closes both streams.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch the top level of every configured directory.
    ///
    /// A directory that cannot be registered is an error; nothing is watched
    /// in that case.
    pub fn new(dirs: &[WatchedDirectory]) -> Result<(Self, WatchStreams)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let (error_tx, error_rx) = mpsc::unbounded_channel::<WatchError>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward(res, &event_tx, &error_tx);
        })
        .context("failed to init file watcher")?;

        for dir in dirs {
            add_watch(&mut watcher, &dir.path)?;
        }

        Ok((
            Self { _watcher: watcher },
            WatchStreams {
                events: event_rx,
                errors: error_rx,
            },
        ))
    }
}

fn add_watch(watcher: &mut RecommendedWatcher, path: &Path) -> Result<()> {
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to add watch for dir '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "added watch for dir");
    Ok(())
}

// Runs on notify's thread; unbounded sends never block it.
fn forward(
    res: notify::Result<Event>,
    event_tx: &UnboundedSender<ChangeEvent>,
    error_tx: &UnboundedSender<WatchError>,
) {
    match res {
        Ok(event) => {
            for change in to_change_events(event) {
                if event_tx.send(change).is_err() {
                    return; // dispatcher gone
                }
            }
        }
        Err(err) => {
            let _ = error_tx.send(WatchError::Notify(err));
        }
    }
}

/// Map a notify event onto one change event per affected path.
///
/// Access notifications (open, close, read) do not change content and are
/// dropped here. So is the paired rename notice inotify sends after the
/// `From` and `To` halves, which would otherwise report the new path twice.
pub fn to_change_events(event: Event) -> Vec<ChangeEvent> {
    let op = match event.kind {
        EventKind::Access(_) => {
            tracing::trace!(paths = ?event.paths, "ignoring access notification");
            return Vec::new();
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            tracing::trace!(paths = ?event.paths, "ignoring paired rename notification");
            return Vec::new();
        }
        EventKind::Create(_) => ChangeOp::Create,
        EventKind::Modify(ModifyKind::Data(_)) => ChangeOp::Write,
        EventKind::Modify(ModifyKind::Metadata(_)) => ChangeOp::Chmod,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeOp::Rename,
        EventKind::Modify(_) => ChangeOp::Write,
        EventKind::Remove(_) => ChangeOp::Remove,
        EventKind::Any | EventKind::Other => ChangeOp::Other,
    };

    event
        .paths
        .into_iter()
        .map(|path| ChangeEvent::new(path, op))
        .collect()
}
