//! Configuration management for rir
//!
//! The configuration is a TOML file (by default `rir.toml` in the working
//! directory) listing the watched directories, plus an optional `[dispatch]`
//! table that controls how matched actions are executed. It is loaded once at
//! startup and read-only afterwards.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::core::PathMatcher;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "rir.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RirConfig {
    /// Watched directories, in file order. The position is the directory index.
    #[serde(rename = "dir", default)]
    pub dirs: Vec<WatchedDirectory>,
    /// How matched actions are executed
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// A single watched directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchedDirectory {
    pub path: PathBuf,
    /// Files whose change means the tests must run again
    pub test_file_pattern: String,
    /// Templates rendered by the tests; a change also means retest
    pub template_file_pattern: String,
    /// Screenshot artifacts written by the tests
    pub screenshot_file_pattern: String,
    /// argv of the test command, run with the parent's stdout/stderr
    pub test_command: Vec<String>,
}

impl WatchedDirectory {
    pub fn new<I, S>(
        path: impl Into<PathBuf>,
        test_file_pattern: &str,
        template_file_pattern: &str,
        screenshot_file_pattern: &str,
        test_command: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            test_file_pattern: test_file_pattern.to_string(),
            template_file_pattern: template_file_pattern.to_string(),
            screenshot_file_pattern: screenshot_file_pattern.to_string(),
            test_command: test_command.into_iter().map(Into::into).collect(),
        }
    }
}

/// Execution discipline for matched actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Every matched action runs in its own task, overlapping runs allowed
    #[default]
    Concurrent,
    /// At most one run per directory and action kind; requests that arrive
    /// meanwhile collapse into a single follow-up run
    SingleFlight,
}

impl FromStr for ExecutionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "concurrent" => Ok(ExecutionPolicy::Concurrent),
            "single_flight" => Ok(ExecutionPolicy::SingleFlight),
            other => Err(format!("unknown execution policy '{}'", other)),
        }
    }
}

/// Configuration for action dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub policy: ExecutionPolicy,
    /// Minimum gap between two accepted actions of the same kind for the
    /// same directory, in milliseconds. 0 disables debouncing.
    #[serde(default)]
    pub debounce_ms: u64,
}

impl DispatchConfig {
    /// Debounce window, `None` when disabled
    pub fn debounce_window(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }
}

impl RirConfig {
    /// Read and parse a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to decode config file '{}'", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Override dispatch settings from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("RIR_POLICY") {
            match val.parse::<ExecutionPolicy>() {
                Ok(policy) => self.dispatch.policy = policy,
                Err(err) => tracing::warn!("ignoring RIR_POLICY: {}", err),
            }
        }

        if let Ok(val) = std::env::var("RIR_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.dispatch.debounce_ms = ms;
            }
        }
    }

    /// Check everything that does not need the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.dirs.is_empty() {
            bail!("no directories configured, add at least one [[dir]] table");
        }

        for (idx, dir) in self.dirs.iter().enumerate() {
            if dir.test_command.is_empty() || dir.test_command[0].trim().is_empty() {
                bail!("dir #{} '{}': test_command must not be empty", idx, dir.path.display());
            }
            PathMatcher::new(dir)
                .with_context(|| format!("dir #{} '{}': invalid glob pattern", idx, dir.path.display()))?;
        }

        Ok(())
    }

    /// Turn every directory path into an absolute, canonical one.
    ///
    /// Watch events carry absolute paths, so the match globs must be rooted
    /// the same way. Fails when a directory does not exist.
    pub fn resolve_paths(&mut self) -> Result<()> {
        for dir in &mut self.dirs {
            let resolved = dir
                .path
                .canonicalize()
                .with_context(|| format!("failed to resolve watched dir '{}'", dir.path.display()))?;
            if !resolved.is_dir() {
                bail!("watched path is not a directory: {}", resolved.display());
            }
            dir.path = resolved;
        }
        Ok(())
    }
}
