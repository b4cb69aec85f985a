//! The watch loop: turns change events into actions
//!
//! The dispatcher owns the watcher's two streams. For every event it asks
//! each directory's [`PathMatcher`] what to do and hands one
//! [`ActionRequest`] per answer to the executor, without waiting for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::WatchedDirectory;
use crate::core::{ActionKind, ActionRequest, ChangeEvent, PathMatcher};
use crate::error::{WatchError, WatchTransportError};
use crate::runner::ActionExecutor;

struct Target {
    directory: Arc<WatchedDirectory>,
    matcher: PathMatcher,
}

pub struct EventDispatcher {
    targets: Vec<Target>,
    executor: Arc<dyn ActionExecutor>,
    debounce: Option<Duration>,
    last_fired: HashMap<(usize, ActionKind), Instant>,
}

impl EventDispatcher {
    /// Compile the matchers for `dirs`. Directory order is kept and gives
    /// each directory its index.
    pub fn new(dirs: &[WatchedDirectory], executor: Arc<dyn ActionExecutor>) -> Result<Self, globset::Error> {
        let targets = dirs
            .iter()
            .map(|dir| {
                Ok(Target {
                    matcher: PathMatcher::new(dir)?,
                    directory: Arc::new(dir.clone()),
                })
            })
            .collect::<Result<Vec<_>, globset::Error>>()?;

        Ok(Self {
            targets,
            executor,
            debounce: None,
            last_fired: HashMap::new(),
        })
    }

    /// Drop requests that repeat an accepted one for the same directory and
    /// kind within `window`
    pub fn with_debounce(mut self, window: Option<Duration>) -> Self {
        self.debounce = window;
        self
    }

    /// All requests `event` calls for, before debouncing
    pub fn requests_for(&self, event: &ChangeEvent) -> Vec<ActionRequest> {
        if !event.op.is_content_change() {
            return Vec::new();
        }

        let mut requests = Vec::new();
        for (index, target) in self.targets.iter().enumerate() {
            for kind in target.matcher.classify(&event.path) {
                requests.push(ActionRequest::new(index, Arc::clone(&target.directory), kind));
            }
        }
        requests
    }

    /// Handle one event; returns how many actions were started
    pub fn dispatch(&mut self, event: &ChangeEvent) -> usize {
        if !event.op.is_content_change() {
            tracing::trace!(path = %event.path.display(), "ignoring chmod event");
            return 0;
        }

        let mut started = 0;
        for request in self.requests_for(event) {
            if self.debounced(&request, Instant::now()) {
                tracing::debug!(
                    dir = %request.directory.path.display(),
                    kind = %request.kind,
                    "debounced action"
                );
                continue;
            }
            self.executor.execute(request);
            started += 1;
        }

        tracing::debug!(path = %event.path.display(), op = ?event.op, actions = started, "fsnotify event");
        started
    }

    fn debounced(&mut self, request: &ActionRequest, now: Instant) -> bool {
        let Some(window) = self.debounce else {
            return false;
        };

        match self.last_fired.get(&request.slot()) {
            Some(last) if now.duration_since(*last) < window => true,
            _ => {
                self.last_fired.insert(request.slot(), now);
                false
            }
        }
    }

    /// Consume both streams until the event stream closes.
    ///
    /// Watcher errors are logged and the loop continues; once the error
    /// stream closes only events are read. The returned value says why the
    /// loop stopped.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<ChangeEvent>,
        mut errors: UnboundedReceiver<WatchError>,
    ) -> WatchTransportError {
        let mut errors_open = true;

        loop {
            tokio::select! {
                next = events.recv() => match next {
                    Some(event) => {
                        self.dispatch(&event);
                    }
                    None => {
                        tracing::error!("failed to read next event, stopping");
                        return WatchTransportError::EventStreamClosed;
                    }
                },
                next = errors.recv(), if errors_open => match next {
                    Some(err) => tracing::error!(error = %err, "watcher error"),
                    None => {
                        tracing::debug!("watcher error stream closed");
                        errors_open = false;
                    }
                },
            }
        }
    }
}
