pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod reload;
pub mod runner;

pub use config::{DispatchConfig, ExecutionPolicy, RirConfig, WatchedDirectory};
pub use dispatch::EventDispatcher;
pub use error::{ProcessError, ReloadError, WatchError, WatchTransportError};
pub use reload::{BroadcastHub, ReloadHub};
pub use runner::{ActionExecutor, ActionRunner, RunnerStats};
