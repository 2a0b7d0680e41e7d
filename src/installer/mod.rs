//! Materializing a grammar package from the registry.
//!
//! An install either completes or leaves nothing behind: any failure after
//! the package directory is created removes the directory again.

pub mod download;
pub mod pattern;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::PrefixPolicy;
use crate::error::{GrammarError, Result};
use crate::registry::{Manifest, RegistryClient, LATEST};
use crate::store::{GrammarStore, CONFIG_FILE, QUERIES_DIR};

use self::download::download_file;
use self::pattern::Pattern;

/// One pattern to select from the manifest, and where matches go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedItem {
    pub pattern: String,
    /// Relative to the package directory.
    pub destination: PathBuf,
}

impl WantedItem {
    pub fn new(pattern: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            destination: destination.into(),
        }
    }
}

/// Configuration document, every grammar module, and the query directory.
pub fn default_wanted() -> Vec<WantedItem> {
    vec![
        WantedItem::new(CONFIG_FILE, ""),
        WantedItem::new("*.wasm", ""),
        WantedItem::new(format!("{QUERIES_DIR}/"), QUERIES_DIR),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The package directory already existed; nothing was touched.
    AlreadyInstalled,
    Installed { version: String, files: Vec<PathBuf> },
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallOutcome::Installed { .. })
    }
}

pub struct Installer {
    store: GrammarStore,
    registry: RegistryClient,
    timeout: Duration,
    prefix_policy: PrefixPolicy,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Installer {
    pub fn new(
        store: GrammarStore,
        registry: RegistryClient,
        timeout: Duration,
        prefix_policy: PrefixPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            timeout,
            prefix_policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &GrammarStore {
        &self.store
    }

    /// Serializes install/uninstall of one id.
    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for `id` once nobody holds or waits on it.
    fn release(&self, id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    pub async fn install(&self, id: &str, wanted: &[WantedItem]) -> Result<InstallOutcome> {
        let dir = self.store.package_dir(id)?;
        let guard = self.lock(id).await;
        let result = self.install_locked(id, &dir, wanted).await;
        self.release(id, guard);
        result
    }

    async fn install_locked(&self, id: &str, dir: &Path, wanted: &[WantedItem]) -> Result<InstallOutcome> {
        if self.store.exists(id).await {
            info!(grammar = %id, "Grammar already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        match self.install_into(id, dir, wanted).await {
            Ok(outcome) => {
                info!(grammar = %id, path = %dir.display(), "Installed grammar");
                Ok(outcome)
            }
            Err(e) => {
                warn!(grammar = %id, error = %e, "Install failed, rolling back");
                if self.store.exists(id).await {
                    if let Err(cleanup) = fs::remove_dir_all(dir).await {
                        warn!(path = %dir.display(), error = %cleanup, "Rollback failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn install_into(&self, id: &str, dir: &Path, wanted: &[WantedItem]) -> Result<InstallOutcome> {
        self.store.create(id).await?;
        let manifest = self.registry.fetch_manifest(id, LATEST).await?;
        let entries = relative_entries(&manifest, self.prefix_policy)?;

        let mut files = Vec::new();
        for item in wanted {
            let pattern = Pattern::parse(&item.pattern)?;
            let destination = dir.join(&item.destination);
            if pattern.is_directory() {
                fs::create_dir_all(&destination)
                    .await
                    .map_err(|e| GrammarError::io(&destination, e))?;
            }

            for (relative, remote) in &entries {
                if !pattern.matches(relative) {
                    continue;
                }
                let url = self.registry.build_url(id, remote, &manifest.version);
                let path = download_file(&**self.registry.http(), &url, &destination, self.timeout).await?;
                files.push(path);
            }
        }

        Ok(InstallOutcome::Installed {
            version: manifest.version,
            files,
        })
    }

    /// Delete an installed package. `false` when it was not installed.
    pub async fn uninstall(&self, id: &str) -> Result<bool> {
        self.store.package_dir(id)?;
        let guard = self.lock(id).await;
        let removed = self.store.remove(id).await;
        self.release(id, guard);
        if removed.as_ref().is_ok_and(|removed| *removed) {
            info!(grammar = %id, "Uninstalled grammar");
        }
        removed
    }
}

/// Pair every manifest path with its prefix-stripped form used for matching.
fn relative_entries<'a>(manifest: &'a Manifest, policy: PrefixPolicy) -> Result<Vec<(String, &'a str)>> {
    manifest
        .files
        .iter()
        .map(|entry| {
            let stripped = match entry.path.strip_prefix(manifest.prefix.as_str()) {
                Some(rest) => rest,
                None if policy == PrefixPolicy::Keep => entry.path.as_str(),
                None => {
                    return Err(GrammarError::PrefixMismatch {
                        path: entry.path.clone(),
                        prefix: manifest.prefix.clone(),
                    })
                }
            };
            Ok((stripped.trim_start_matches('/').to_string(), entry.path.as_str()))
        })
        .collect()
}
