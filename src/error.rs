use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the grammar store, installer and cache.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("invalid grammar id {0:?}")]
    InvalidId(String),

    #[error("no configuration document in grammar package {0}")]
    ConfigMissing(PathBuf),

    #[error("invalid configuration document {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to fetch manifest from {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("invalid pattern {pattern:?}: {reason}")]
    PatternMatch { pattern: String, reason: String },

    #[error("manifest entry {path:?} does not start with prefix {prefix:?}")]
    PrefixMismatch { path: String, prefix: String },

    #[error("download of {url} timed out after {timeout:?}")]
    DownloadTimeout { url: String, timeout: Duration },

    #[error("download of {url} returned no content")]
    DownloadEmpty { url: String },

    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("failed to load grammar {name}: {reason}")]
    GrammarLoad { name: String, reason: String },

    #[error("grammar {0} is not installed")]
    NotInstalled(String),

    #[error("failed to parse source with grammar {0}")]
    Parse(String),

    #[error("filesystem error at {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("grammar service failed to initialize: {0}")]
    Init(String),
}

impl GrammarError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GrammarError::StoreIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn load(name: &str, reason: impl ToString) -> Self {
        GrammarError::GrammarLoad {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = GrammarError> = std::result::Result<T, E>;
