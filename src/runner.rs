//! Executes retest and reload actions
//!
//! Every action runs in its own tokio task. Failures are logged at the task
//! boundary and never reach the dispatcher.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::config::{ExecutionPolicy, WatchedDirectory};
use crate::core::{ActionKind, ActionRequest};
use crate::error::{ProcessError, ReloadError};
use crate::reload::ReloadHub;

/// Anything that can take an action request off the dispatcher's hands
pub trait ActionExecutor: Send + Sync {
    /// Start the action and return immediately
    fn execute(&self, request: ActionRequest);
}

/// Snapshot of what the runner has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Requests folded into an already scheduled run (single-flight only)
    pub coalesced: usize,
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    coalesced: AtomicUsize,
}

#[derive(Debug, Default)]
struct Slot {
    rerun: bool,
}

struct Shared {
    hub: Arc<dyn ReloadHub>,
    policy: ExecutionPolicy,
    slots: Mutex<HashMap<(usize, ActionKind), Slot>>,
    counters: Counters,
}

/// Spawns one task per action request
#[derive(Clone)]
pub struct ActionRunner {
    shared: Arc<Shared>,
}

impl ActionRunner {
    pub fn new(hub: Arc<dyn ReloadHub>, policy: ExecutionPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                hub,
                policy,
                slots: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.shared.policy
    }

    pub fn stats(&self) -> RunnerStats {
        let c = &self.shared.counters;
        RunnerStats {
            started: c.started.load(Ordering::SeqCst),
            succeeded: c.succeeded.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            coalesced: c.coalesced.load(Ordering::SeqCst),
        }
    }

    /// Start `request` in a new task.
    ///
    /// Returns `None` when single-flight folded the request into a run that
    /// is already in progress.
    pub fn spawn(&self, request: ActionRequest) -> Option<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);

        match shared.policy {
            ExecutionPolicy::Concurrent => Some(tokio::spawn(async move {
                perform(&shared, &request).await;
            })),
            ExecutionPolicy::SingleFlight => {
                if !claim_slot(&shared, &request) {
                    return None;
                }
                Some(tokio::spawn(async move {
                    loop {
                        perform(&shared, &request).await;
                        if !release_slot(&shared, &request) {
                            break;
                        }
                    }
                }))
            }
        }
    }
}

impl ActionExecutor for ActionRunner {
    fn execute(&self, request: ActionRequest) {
        let _ = self.spawn(request);
    }
}

fn lock_slots(shared: &Shared) -> MutexGuard<'_, HashMap<(usize, ActionKind), Slot>> {
    shared.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// true when the caller now owns the slot and must run the action
fn claim_slot(shared: &Shared, request: &ActionRequest) -> bool {
    match lock_slots(shared).entry(request.slot()) {
        Entry::Occupied(mut slot) => {
            slot.get_mut().rerun = true;
            shared.counters.coalesced.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                dir = %request.directory.path.display(),
                kind = %request.kind,
                "action already in flight, coalescing"
            );
            false
        }
        Entry::Vacant(slot) => {
            slot.insert(Slot::default());
            true
        }
    }
}

// true when a request arrived meanwhile and the action must run once more
fn release_slot(shared: &Shared, request: &ActionRequest) -> bool {
    let mut slots = lock_slots(shared);
    let rerun = slots
        .get_mut(&request.slot())
        .map(|slot| std::mem::take(&mut slot.rerun))
        .unwrap_or(false);
    if !rerun {
        slots.remove(&request.slot());
    }
    rerun
}

async fn perform(shared: &Shared, request: &ActionRequest) {
    let dir = &request.directory;
    shared.counters.started.fetch_add(1, Ordering::SeqCst);

    let outcome = match request.kind {
        ActionKind::Retest => run_retest(dir).await.map_err(|err| ("failed to test", err.to_string())),
        ActionKind::Reload => run_reload(shared.hub.as_ref(), dir).map_err(|err| ("failed to reload", err.to_string())),
    };

    match outcome {
        Ok(()) => {
            shared.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        }
        Err((message, error)) => {
            shared.counters.failed.fetch_add(1, Ordering::SeqCst);
            tracing::error!(dir = %dir.path.display(), error = %error, "{}", message);
        }
    }
}

/// Run the directory's test command to completion.
///
/// The child shares this process's stdout and stderr so test output shows up
/// in the operator's terminal. No timeout is applied.
pub async fn run_retest(dir: &WatchedDirectory) -> Result<(), ProcessError> {
    let (program, args) = dir.test_command.split_first().ok_or(ProcessError::EmptyCommand)?;
    tracing::info!(dir = %dir.path.display(), "retesting directory");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        program: program.clone(),
        source,
    })?;

    if !status.success() {
        return Err(ProcessError::Failed {
            program: program.clone(),
            status,
        });
    }
    Ok(())
}

/// Ask the hub to refresh every viewer
pub fn run_reload(hub: &dyn ReloadHub, dir: &WatchedDirectory) -> Result<(), ReloadError> {
    tracing::info!(dir = %dir.path.display(), "reloading screenshots");
    hub.force_refresh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::BroadcastHub;
    use std::time::Duration;

    fn dir_with(command: &[&str]) -> WatchedDirectory {
        WatchedDirectory::new("/proj", "*_test.go", "*.gotmpl", "*.png", command.iter().copied())
    }

    fn request(dir: WatchedDirectory, kind: ActionKind) -> ActionRequest {
        ActionRequest::new(0, Arc::new(dir), kind)
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = run_retest(&dir_with(&[])).await.unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_retest(&dir_with(&["rir-definitely-not-a-real-binary"])).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status() {
        assert!(run_retest(&dir_with(&["true"])).await.is_ok());

        let err = run_retest(&dir_with(&["sh", "-c", "exit 1"])).await.unwrap_err();
        match err {
            ProcessError::Failed { program, status } => {
                assert_eq!(program, "sh");
                assert_eq!(status.code(), Some(1));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_reload_uses_hub() {
        let hub = BroadcastHub::new();
        run_reload(&hub, &dir_with(&["true"])).unwrap();
        assert_eq!(hub.refreshes(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_is_counted_not_propagated() {
        let runner = ActionRunner::new(Arc::new(BroadcastHub::new()), ExecutionPolicy::Concurrent);

        let handle = runner.spawn(request(dir_with(&["false"]), ActionKind::Retest)).unwrap();
        handle.await.unwrap();

        assert_eq!(
            runner.stats(),
            RunnerStats {
                started: 1,
                succeeded: 0,
                failed: 1,
                coalesced: 0
            }
        );
    }

    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_run_logs_one_error() {
        use tracing_subscriber::prelude::*;

        let errors = ErrorCounter::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(errors.clone()));
        let runner = ActionRunner::new(Arc::new(BroadcastHub::new()), ExecutionPolicy::Concurrent);

        let handle = runner.spawn(request(dir_with(&["sh", "-c", "exit 1"]), ActionKind::Retest)).unwrap();
        handle.await.unwrap();

        assert_eq!(errors.0.load(Ordering::SeqCst), 1);
        assert_eq!(runner.stats().failed, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_runs_overlap() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log = temp_dir.path().join("runs.log");
        let script = format!("echo start >> '{0}'; sleep 1; echo end >> '{0}'", log.display());
        let runner = ActionRunner::new(Arc::new(BroadcastHub::new()), ExecutionPolicy::Concurrent);

        let first = runner.spawn(request(dir_with(&["sh", "-c", script.as_str()]), ActionKind::Retest)).unwrap();
        let second = runner.spawn(request(dir_with(&["sh", "-c", script.as_str()]), ActionKind::Retest)).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let during = std::fs::read_to_string(&log).unwrap();
        assert_eq!(during.matches("start").count(), 2, "both runs should be in flight: {:?}", during);
        assert_eq!(during.matches("end").count(), 0);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(runner.stats().succeeded, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_flight_coalesces() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let log = temp_dir.path().join("runs.log");
        let script = format!("echo start >> '{0}'; sleep 0.5", log.display());
        let runner = ActionRunner::new(Arc::new(BroadcastHub::new()), ExecutionPolicy::SingleFlight);
        let dir = dir_with(&["sh", "-c", script.as_str()]);

        let first = runner.spawn(request(dir.clone(), ActionKind::Retest)).unwrap();
        assert!(runner.spawn(request(dir.clone(), ActionKind::Retest)).is_none());
        assert!(runner.spawn(request(dir.clone(), ActionKind::Retest)).is_none());

        // The first task also performs the single follow-up run.
        first.await.unwrap();

        let runs = std::fs::read_to_string(&log).unwrap();
        assert_eq!(runs.matches("start").count(), 2);
        assert_eq!(runner.stats().coalesced, 2);
        assert_eq!(runner.stats().started, 2);

        // The slot is free again.
        let again = runner.spawn(request(dir, ActionKind::Retest)).unwrap();
        again.await.unwrap();
        assert_eq!(runner.stats().started, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_flight_keys_by_kind() {
        let runner = ActionRunner::new(Arc::new(BroadcastHub::new()), ExecutionPolicy::SingleFlight);
        let dir = dir_with(&["sleep", "0.2"]);

        let retest = runner.spawn(request(dir.clone(), ActionKind::Retest));
        let reload = runner.spawn(request(dir, ActionKind::Reload));

        assert!(retest.is_some());
        assert!(reload.is_some());
        retest.unwrap().await.unwrap();
        reload.unwrap().await.unwrap();
        assert_eq!(runner.stats().succeeded, 2);
    }
}
