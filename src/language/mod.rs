//! In-memory model of an installed grammar.

pub mod resolve;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::{CompiledGrammar, GrammarEngine};
use crate::error::{GrammarError, Result};
use crate::store::{PackageContents, QUERY_EXTENSION};

/// The package's `tree-sitter.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default)]
    pub grammars: Vec<GrammarInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PackageMetadata>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrammarInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, rename = "file-types", skip_serializing_if = "Vec::is_empty")]
    pub file_types: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Where a module's bytes come from.
#[derive(Debug, Clone)]
pub enum ModuleSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

impl ModuleSource {
    async fn read(&self) -> std::io::Result<Arc<[u8]>> {
        match self {
            ModuleSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            ModuleSource::File(path) => Ok(tokio::fs::read(path).await?.into()),
        }
    }
}

/// One compiled grammar module file.
#[derive(Debug, Clone)]
pub struct GrammarModule {
    pub file_name: String,
    /// Logical name, see [`resolve::derive_module_name`].
    pub name: String,
    pub source: ModuleSource,
}

impl GrammarModule {
    pub fn new(file_name: String, source: ModuleSource) -> Self {
        let name = resolve::derive_module_name(&file_name);
        Self {
            file_name,
            name,
            source,
        }
    }
}

/// A handle is either a package-level container or one of its extensions.
#[derive(Debug)]
pub enum HandleKind {
    Container {
        /// `None` when no module's name matches the handle's name.
        primary: Option<GrammarModule>,
        extensions: BTreeMap<String, Arc<LanguageHandle>>,
    },
    Extension { module: GrammarModule },
}

pub struct LanguageHandle {
    name: String,
    config: Arc<PackageConfig>,
    queries: Arc<BTreeMap<String, String>>,
    kind: HandleKind,
    engine: Arc<dyn GrammarEngine>,
    compiled: Mutex<Option<CompiledGrammar>>,
}

impl std::fmt::Debug for LanguageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LanguageHandle {
    /// Build a container handle. The module named like the handle becomes the
    /// primary module; every other module becomes a leaf extension sharing this
    /// handle's config and queries.
    pub fn new(
        name: impl Into<String>,
        config: PackageConfig,
        modules: Vec<GrammarModule>,
        queries: BTreeMap<String, String>,
        engine: Arc<dyn GrammarEngine>,
    ) -> Self {
        let name = name.into();
        let config = Arc::new(config);
        let queries = Arc::new(queries);

        let (primary, rest) = resolve::split_primary(&name, modules);
        if primary.is_none() {
            warn!(grammar = %name, "No module matches the grammar name");
        }

        let mut extensions = BTreeMap::new();
        for module in rest {
            let ext_name = module.name.clone();
            let ext = LanguageHandle {
                name: ext_name.clone(),
                config: Arc::clone(&config),
                queries: Arc::clone(&queries),
                kind: HandleKind::Extension { module },
                engine: Arc::clone(&engine),
                compiled: Mutex::new(None),
            };
            if extensions.insert(ext_name.clone(), Arc::new(ext)).is_some() {
                warn!(grammar = %name, extension = %ext_name, "Duplicate extension module");
            }
        }

        LanguageHandle {
            name,
            config,
            queries,
            kind: HandleKind::Container {
                primary,
                extensions,
            },
            engine,
            compiled: Mutex::new(None),
        }
    }

    pub fn from_package(package: PackageContents, engine: Arc<dyn GrammarEngine>) -> Self {
        Self::new(
            package.id,
            package.config,
            package.modules,
            package.queries,
            engine,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PackageConfig {
        &self.config
    }

    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    pub fn is_extension(&self) -> bool {
        matches!(self.kind, HandleKind::Extension { .. })
    }

    /// The module this handle loads, if resolved.
    pub fn module(&self) -> Option<&GrammarModule> {
        match &self.kind {
            HandleKind::Container { primary, .. } => primary.as_ref(),
            HandleKind::Extension { module } => Some(module),
        }
    }

    /// Extensions of a container; `None` for an extension handle.
    pub fn extensions(&self) -> Option<&BTreeMap<String, Arc<LanguageHandle>>> {
        match &self.kind {
            HandleKind::Container { extensions, .. } => Some(extensions),
            HandleKind::Extension { .. } => None,
        }
    }

    pub fn extension(&self, name: &str) -> Option<Arc<LanguageHandle>> {
        self.extensions()?.get(name).cloned()
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions()
            .map(|e| e.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Query document by name; `highlights` and `highlights.scm` are the same.
    pub fn query(&self, name: &str) -> Option<&str> {
        let suffix = format!(".{QUERY_EXTENSION}");
        let key = if name.ends_with(&suffix) {
            name.to_string()
        } else {
            format!("{name}{suffix}")
        };
        self.queries.get(&key).map(String::as_str)
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub async fn is_loaded(&self) -> bool {
        self.compiled.lock().await.is_some()
    }

    /// Load the compiled grammar, or return the one already loaded.
    ///
    /// Concurrent callers wait for a single load.
    pub async fn load_grammar(&self) -> Result<CompiledGrammar> {
        let mut slot = self.compiled.lock().await;
        if let Some(grammar) = slot.as_ref() {
            return Ok(Arc::clone(grammar));
        }

        let module = self
            .module()
            .ok_or_else(|| GrammarError::load(&self.name, "no module matches the grammar name"))?;
        let bytes = module
            .source
            .read()
            .await
            .map_err(|e| GrammarError::load(&self.name, e))?;
        let language = self
            .engine
            .load_language(&module.name, &bytes)
            .map_err(|e| match e {
                GrammarError::GrammarLoad { .. } => e,
                other => GrammarError::load(&self.name, other),
            })?;

        debug!(grammar = %self.name, module = %module.file_name, "Loaded grammar");
        let grammar = Arc::new(language);
        *slot = Some(Arc::clone(&grammar));
        Ok(grammar)
    }

    /// Drop the compiled grammar. Always succeeds.
    pub async fn unload_grammar(&self) -> bool {
        self.compiled.lock().await.take();
        true
    }
}
