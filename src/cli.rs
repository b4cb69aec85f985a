use std::path::PathBuf;
use clap::Parser;

use crate::config::{ExecutionPolicy, RirConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "rir")]
#[command(version)]
#[command(about = "Re-runs tests and refreshes screenshot viewers when project files change")]
#[command(long_about = "rir watches the directories listed in its config file. A change to a test or template file re-runs that directory's test command; a change to a screenshot tells connected viewers to refresh.")]
pub struct Cli {
    /// Config file to load
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Override the execution policy from the config file
    #[arg(long, help = "How matched actions run")]
    pub policy: Option<ExecutionPolicy>,

    /// Override the debounce window from the config file
    #[arg(long, value_name = "MS", help = "Ignore repeated actions within this many milliseconds (0 disables)")]
    pub debounce_ms: Option<u64>,

    /// Print the screenshots of every directory and exit
    #[arg(long, help = "List screenshots per directory instead of watching")]
    pub list: bool,
}

impl Cli {
    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    /// Flags win over the environment, which wins over the file
    pub fn apply_overrides(&self, config: &mut RirConfig) {
        if let Some(policy) = self.policy {
            config.dispatch.policy = policy;
        }
        if let Some(ms) = self.debounce_ms {
            config.dispatch.debounce_ms = ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["rir"]);

        assert_eq!(cli.config, PathBuf::from("rir.toml"));
        assert!(!cli.verbose);
        assert!(!cli.list);
        assert!(cli.policy.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from(["rir", "-c", "other.toml", "--policy", "single-flight", "--debounce-ms", "300"]);
        let mut config = RirConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert_eq!(config.dispatch.policy, ExecutionPolicy::SingleFlight);
        assert_eq!(config.dispatch.debounce_ms, 300);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["rir"]);
        let mut config = RirConfig::default();
        config.dispatch.debounce_ms = 42;
        cli.apply_overrides(&mut config);

        assert_eq!(config.dispatch.debounce_ms, 42);
        assert_eq!(config.dispatch.policy, ExecutionPolicy::Concurrent);
    }
}
