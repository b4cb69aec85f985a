use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use super::events::ActionKind;
use crate::config::WatchedDirectory;

/// Decides which actions a changed path asks for within one directory.
///
/// Each pattern is joined onto the directory path and compiled once. `*` and
/// `?` never cross a path separator and the whole path must match, like shell
/// globbing, so `*_test.go` only covers the directory's top level.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    root: PathBuf,
    test: GlobMatcher,
    template: GlobMatcher,
    screenshot: GlobMatcher,
    screenshot_pattern: String,
}

/// Screenshot found on disk, named relative to its directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Screenshot {
    pub path: PathBuf,
    pub name: String,
}

impl PathMatcher {
    pub fn new(dir: &WatchedDirectory) -> Result<Self, globset::Error> {
        Ok(Self {
            root: dir.path.clone(),
            test: compile(&dir.path, &dir.test_file_pattern)?,
            template: compile(&dir.path, &dir.template_file_pattern)?,
            screenshot: compile(&dir.path, &dir.screenshot_file_pattern)?,
            screenshot_pattern: dir.screenshot_file_pattern.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every action `path` asks for; empty when nothing matches
    pub fn classify<P: AsRef<Path>>(&self, path: P) -> BTreeSet<ActionKind> {
        let path = path.as_ref();
        let mut kinds = BTreeSet::new();

        if self.test.is_match(path) || self.template.is_match(path) {
            kinds.insert(ActionKind::Retest);
        }
        if self.screenshot.is_match(path) {
            kinds.insert(ActionKind::Reload);
        }

        kinds
    }

    /// Screenshots currently on disk, sorted by name
    pub fn screenshots(&self) -> Result<Vec<Screenshot>, glob::PatternError> {
        let root = self.root.to_string_lossy();
        let pattern = format!(
            "{}{}{}",
            glob::Pattern::escape(root.trim_end_matches(std::path::MAIN_SEPARATOR)),
            std::path::MAIN_SEPARATOR,
            self.screenshot_pattern
        );

        let mut found = Vec::new();
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    let name = path
                        .strip_prefix(&self.root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .into_owned();
                    found.push(Screenshot { path, name });
                }
                Err(err) => tracing::warn!("skipping unreadable screenshot candidate: {}", err),
            }
        }
        found.sort();
        Ok(found)
    }
}

/// One-shot classification without keeping the compiled matcher around
pub fn classify<P: AsRef<Path>>(
    dir: &WatchedDirectory,
    path: P,
) -> Result<BTreeSet<ActionKind>, globset::Error> {
    Ok(PathMatcher::new(dir)?.classify(path))
}

fn compile(root: &Path, pattern: &str) -> Result<GlobMatcher, globset::Error> {
    let root = root.to_string_lossy();
    let joined = if root.is_empty() {
        pattern.to_string()
    } else {
        format!("{}/{}", escape(root.trim_end_matches('/')), pattern)
    };

    Ok(GlobBuilder::new(&joined)
        .literal_separator(true)
        .backslash_escape(true)
        .build()?
        .compile_matcher())
}

// The directory part is a literal path, not a pattern.
fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        match c {
            '*' | '?' | '[' | '{' | '}' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}
