use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::WatchedDirectory;

/// Operation reported by the watcher for a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
    Other,
}

impl ChangeOp {
    /// Metadata-only changes never trigger an action
    pub fn is_content_change(self) -> bool {
        !matches!(self, ChangeOp::Chmod)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub op: ChangeOp,
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, op: ChangeOp) -> Self {
        Self {
            path: path.into(),
            op,
            timestamp: SystemTime::now(),
        }
    }
}

/// What a matched change asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// Code or template changed: run the directory's test command
    Retest,
    /// A screenshot changed: tell connected viewers to refresh
    Reload,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Retest => f.write_str("retest"),
            ActionKind::Reload => f.write_str("reload"),
        }
    }
}

/// One unit of work produced by the dispatcher for one directory
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Position of the directory in the configuration
    pub index: usize,
    pub directory: Arc<WatchedDirectory>,
    pub kind: ActionKind,
}

impl ActionRequest {
    pub fn new(index: usize, directory: Arc<WatchedDirectory>, kind: ActionKind) -> Self {
        Self { index, directory, kind }
    }

    /// Key used by the single-flight guard and the debouncer
    pub fn slot(&self) -> (usize, ActionKind) {
        (self.index, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_chmod_is_metadata() {
        assert!(!ChangeOp::Chmod.is_content_change());
        for op in [ChangeOp::Create, ChangeOp::Write, ChangeOp::Remove, ChangeOp::Rename, ChangeOp::Other] {
            assert!(op.is_content_change(), "{:?} should count as a content change", op);
        }
    }

    #[test]
    fn test_change_event_creation() {
        let event = ChangeEvent::new("/proj/foo_test.go", ChangeOp::Write);

        assert_eq!(event.path, PathBuf::from("/proj/foo_test.go"));
        assert_eq!(event.op, ChangeOp::Write);
        assert!(event.timestamp <= SystemTime::now());
    }

    #[test]
    fn test_action_request_slot() {
        let dir = Arc::new(WatchedDirectory::new("/proj", "*_test.go", "*.gotmpl", "*.jpeg", ["go", "test"]));
        let request = ActionRequest::new(3, dir, ActionKind::Reload);

        assert_eq!(request.slot(), (3, ActionKind::Reload));
        assert_eq!(request.kind.to_string(), "reload");
    }
}
