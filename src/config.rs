use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{GrammarError, Result};

pub const DEFAULT_REGISTRY: &str = "https://unpkg.com";
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the directory under the storage root that holds every package.
const GRAMMARS_DIR: &str = "tree-sitter";
const CONFIG_DOCUMENT: &str = "config.json";

/// What to do with a manifest entry whose path does not carry the manifest prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixPolicy {
    /// Abort the install with [`GrammarError::PrefixMismatch`].
    #[default]
    Error,
    /// Match the entry against the patterns as-is.
    Keep,
}

/// Per-process settings. Fixed once the service is constructed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_root: PathBuf,
    pub registry_url: String,
    pub download_timeout: Duration,
    pub prefix_policy: PrefixPolicy,
}

impl Settings {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            registry_url: DEFAULT_REGISTRY.to_string(),
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            prefix_policy: PrefixPolicy::default(),
        }
    }

    /// Build settings from `GRAMMARIAN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let root = std::env::var_os("GRAMMARIAN_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|d| d.join("grammarian")))
            .unwrap_or_else(|| PathBuf::from(".grammarian"));

        let mut settings = Self::new(root);
        if let Ok(url) = std::env::var("GRAMMARIAN_REGISTRY") {
            settings.registry_url = url;
        }
        if let Some(secs) = std::env::var("GRAMMARIAN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            settings.download_timeout = Duration::from_secs(secs);
        }
        settings
    }

    /// `<root>/tree-sitter`, the directory holding one subdirectory per grammar.
    pub fn grammars_dir(&self) -> PathBuf {
        self.storage_root.join(GRAMMARS_DIR)
    }

    pub fn config_document_path(&self) -> PathBuf {
        self.grammars_dir().join(CONFIG_DOCUMENT)
    }
}

/// The persisted process-wide configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    /// Resolved registry version of every grammar installed through the service.
    pub installed: BTreeMap<String, String>,
    /// Registry the grammars were fetched from, recorded on first install.
    pub registry: Option<String>,
}

impl ConfigDocument {
    /// Load the document; a missing file yields the default document.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration document, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(GrammarError::io(path, e)),
        };
        serde_json::from_str(&text).map_err(|source| GrammarError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist the document by writing a sibling temp file and renaming it into place.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GrammarError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| GrammarError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).await.map_err(|e| GrammarError::io(&tmp, e))?;
        fs::rename(&tmp, path).await.map_err(|e| GrammarError::io(path, e))
    }
}
