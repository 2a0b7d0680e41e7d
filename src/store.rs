//! On-disk grammar packages, one directory per grammar id.
//!
//! ```text
//! <root>/tree-sitter/<id>/
//!     tree-sitter.json
//!     tree-sitter-<id>.wasm
//!     tree-sitter-<dialect>.wasm
//!     queries/*.scm
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{GrammarError, Result};
use crate::language::{GrammarModule, ModuleSource, PackageConfig};

pub const CONFIG_FILE: &str = "tree-sitter.json";
pub const MODULE_EXTENSION: &str = "wasm";
pub const QUERIES_DIR: &str = "queries";
pub const QUERY_EXTENSION: &str = "scm";

/// Everything read from one package directory.
#[derive(Debug)]
pub struct PackageContents {
    pub id: String,
    pub config: PackageConfig,
    pub modules: Vec<GrammarModule>,
    pub queries: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GrammarStore {
    root: PathBuf,
}

impl GrammarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of package `id`. Ids are single path components.
    pub fn package_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    /// Whether a package directory exists, complete or not.
    pub async fn exists(&self, id: &str) -> bool {
        match self.package_dir(id) {
            Ok(dir) => is_dir(&dir).await,
            Err(_) => false,
        }
    }

    /// Whether the package exists and carries its configuration document.
    pub async fn is_available(&self, id: &str) -> bool {
        match self.package_dir(id) {
            Ok(dir) => is_file(&dir.join(CONFIG_FILE)).await,
            Err(_) => false,
        }
    }

    /// Ids of every available package, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GrammarError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GrammarError::io(&self.root, e))?
        {
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.is_available(&id).await {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn create(&self, id: &str) -> Result<PathBuf> {
        let dir = self.package_dir(id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| GrammarError::io(&dir, e))?;
        Ok(dir)
    }

    /// Delete the whole package directory. Returns `false` if it was absent.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let dir = self.package_dir(id)?;
        if !is_dir(&dir).await {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| GrammarError::io(&dir, e))?;
        debug!(grammar = %id, path = %dir.display(), "Removed grammar package");
        Ok(true)
    }

    /// Read a package. `Ok(None)` when no package directory exists.
    pub async fn read_package(&self, id: &str) -> Result<Option<PackageContents>> {
        let dir = self.package_dir(id)?;
        if !is_dir(&dir).await {
            return Ok(None);
        }

        let config_path = dir.join(CONFIG_FILE);
        let text = match fs::read_to_string(&config_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GrammarError::ConfigMissing(dir));
            }
            Err(e) => return Err(GrammarError::io(&config_path, e)),
        };
        let config: PackageConfig =
            serde_json::from_str(&text).map_err(|source| GrammarError::InvalidConfig {
                path: config_path,
                source,
            })?;

        let modules = read_modules(&dir).await?;
        let queries = read_queries(&dir.join(QUERIES_DIR)).await;

        Ok(Some(PackageContents {
            id: id.to_string(),
            config,
            modules,
            queries,
        }))
    }
}

/// Reject ids that would not name a directory directly under the root.
fn validate_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || Path::new(id).is_absolute();
    if invalid {
        return Err(GrammarError::InvalidId(id.to_string()));
    }
    Ok(())
}

async fn read_modules(dir: &Path) -> Result<Vec<GrammarModule>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| GrammarError::io(dir, e))?;
    let mut modules = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| GrammarError::io(dir, e))? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MODULE_EXTENSION) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        modules.push(GrammarModule::new(file_name, ModuleSource::File(path)));
    }
    modules.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(modules)
}

/// Read every `*.scm` file in the queries directory. Failures are logged and
/// yield whatever was read so far (usually nothing).
async fn read_queries(dir: &Path) -> BTreeMap<String, String> {
    let mut queries = BTreeMap::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %dir.display(), error = %e, "Failed to list queries");
            }
            return queries;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to list queries");
                break;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(QUERY_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        match fs::read_to_string(&path).await {
            Ok(text) => {
                queries.insert(name, text);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to read query"),
        }
    }
    queries
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
