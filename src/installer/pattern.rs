//! Matching manifest paths against the patterns an install asks for.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{GrammarError, Result};

/// A parsed "wanted" pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// No wildcard, no trailing separator: the whole path must be equal.
    Exact(String),
    /// Contains `*`. Wildcards never cross a `/`.
    Glob(GlobMatcher),
    /// Trailing `/`: every file below the directory, at any depth.
    Directory(String),
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(GrammarError::PatternMatch {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        if let Some(stem) = pattern.strip_suffix('/') {
            return Ok(Pattern::Directory(stem.to_string()));
        }
        if pattern.contains('*') {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| GrammarError::PatternMatch {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(Pattern::Glob(glob.compile_matcher()));
        }
        Ok(Pattern::Exact(pattern.to_string()))
    }

    /// Whether this pattern denotes a whole directory tree.
    pub fn is_directory(&self) -> bool {
        matches!(self, Pattern::Directory(_))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(exact) => path == exact,
            Pattern::Glob(glob) => glob.is_match(path),
            Pattern::Directory(stem) => path
                .strip_prefix(stem.as_str())
                .is_some_and(|rest| stem.is_empty() || rest.starts_with('/')),
        }
    }
}

/// Whether `path` (relative to the package root) is selected by `pattern`.
pub fn matches(path: &str, pattern: &str) -> Result<bool> {
    Ok(Pattern::parse(pattern)?.matches(path))
}
