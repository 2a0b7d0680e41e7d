//! The process-wide entry point: cached language handles and parsers behind a
//! one-time initialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Mutex as AsyncMutex, OnceCell};
use tracing::{debug, error, info, warn};
use tree_sitter::{Parser, Tree};

use crate::config::{ConfigDocument, Settings};
use crate::engine::{GrammarEngine, WasmEngine};
use crate::error::{GrammarError, Result};
use crate::events::{EventBus, GrammarEvent};
use crate::installer::{default_wanted, InstallOutcome, Installer};
use crate::language::LanguageHandle;
use crate::registry::{HttpClient, RegistryClient, ReqwestClient};
use crate::store::GrammarStore;

/// Options for lookups that may hit a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Bypass the cache and rebuild from disk.
    pub force_reload: bool,
}

impl LoadOptions {
    pub fn reload() -> Self {
        Self { force_reload: true }
    }
}

pub struct GrammarService {
    settings: Settings,
    store: GrammarStore,
    installer: Installer,
    engine: Arc<dyn GrammarEngine>,
    events: EventBus,
    init: OnceCell<Result<(), String>>,
    document: AsyncMutex<ConfigDocument>,
    languages: Mutex<HashMap<String, Arc<LanguageHandle>>>,
    parsers: Mutex<HashMap<String, Parser>>,
}

impl GrammarService {
    /// Create the service and, when called inside a tokio runtime, start
    /// initialization in the background.
    pub fn new(settings: Settings, engine: Arc<dyn GrammarEngine>, http: Arc<dyn HttpClient>) -> Arc<Self> {
        let store = GrammarStore::new(settings.grammars_dir());
        let registry = RegistryClient::new(settings.registry_url.clone(), http);
        let installer = Installer::new(
            store.clone(),
            registry,
            settings.download_timeout,
            settings.prefix_policy,
        );

        let service = Arc::new(Self {
            settings,
            store,
            installer,
            engine,
            events: EventBus::default(),
            init: OnceCell::new(),
            document: AsyncMutex::new(ConfigDocument::default()),
            languages: Mutex::new(HashMap::new()),
            parsers: Mutex::new(HashMap::new()),
        });

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let eager = Arc::clone(&service);
            runtime.spawn(async move {
                let _ = eager.wait_for_init().await;
            });
        }
        service
    }

    /// Service over the wasm engine and a `reqwest` HTTP client.
    pub fn with_defaults(settings: Settings) -> Arc<Self> {
        Self::new(settings, Arc::new(WasmEngine::new()), Arc::new(ReqwestClient::new()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GrammarEvent> {
        self.events.subscribe()
    }

    async fn initialize(&self) -> Result<()> {
        self.engine.bootstrap().await?;
        let document = ConfigDocument::load(&self.settings.config_document_path()).await?;
        *self.document.lock().await = document;
        Ok(())
    }

    /// Wait for the one shared initialization. Every caller sees the same outcome.
    pub async fn wait_for_init(&self) -> Result<()> {
        let outcome = self
            .init
            .get_or_init(|| async {
                match self.initialize().await {
                    Ok(()) => {
                        info!(root = %self.settings.storage_root.display(), "Grammar service initialized");
                        self.events.emit(GrammarEvent::Initialized);
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "Grammar service failed to initialize");
                        self.events.emit(GrammarEvent::Error(e.to_string()));
                        Err(e.to_string())
                    }
                }
            })
            .await;
        outcome.clone().map_err(GrammarError::Init)
    }

    fn languages(&self) -> MutexGuard<'_, HashMap<String, Arc<LanguageHandle>>> {
        self.languages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn parsers(&self) -> MutexGuard<'_, HashMap<String, Parser>> {
        self.parsers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emit failures on the event channel before handing them back.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.events.emit(GrammarEvent::Error(e.to_string()));
        }
        result
    }

    /// The handle for `id`, or `None` when the grammar is not installed.
    pub async fn get_language(&self, id: &str, options: LoadOptions) -> Result<Option<Arc<LanguageHandle>>> {
        self.wait_for_init().await?;
        if !options.force_reload {
            if let Some(handle) = self.languages().get(id) {
                return Ok(Some(Arc::clone(handle)));
            }
        }

        let package = self.report(self.store.read_package(id).await)?;
        let Some(package) = package else {
            self.languages().remove(id);
            return Ok(None);
        };

        let handle = Arc::new(LanguageHandle::from_package(package, Arc::clone(&self.engine)));
        debug!(grammar = %id, extensions = ?handle.extension_names(), "Constructed language handle");
        self.languages().insert(id.to_string(), Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Install `id` if it is missing, then return its handle.
    pub async fn ensure_language(&self, id: &str) -> Result<Option<Arc<LanguageHandle>>> {
        if !self.is_language_available(id).await? {
            self.install_language(id).await?;
        }
        self.get_language(id, LoadOptions::default()).await
    }

    /// A fresh parser bound to the grammar of `id`. Not cached.
    pub async fn create_parser(&self, id: &str) -> Result<Parser> {
        let result = self.build_parser(id, LoadOptions::default()).await;
        self.report(result)
    }

    async fn build_parser(&self, id: &str, options: LoadOptions) -> Result<Parser> {
        let handle = self
            .get_language(id, options)
            .await?
            .ok_or_else(|| GrammarError::NotInstalled(id.to_string()))?;
        let grammar = handle.load_grammar().await?;

        let mut parser = Parser::new();
        self.engine.configure_parser(&mut parser)?;
        parser
            .set_language(&grammar)
            .map_err(|e| GrammarError::load(id, e))?;
        Ok(parser)
    }

    /// Parse `code` with the cached parser for `id`, building one if needed.
    pub async fn parse(&self, id: &str, code: &str, options: LoadOptions) -> Result<Tree> {
        let cached = !options.force_reload && self.parsers().contains_key(id);
        if !cached {
            let parser = self.report(self.build_parser(id, options).await)?;
            self.parsers().insert(id.to_string(), parser);
        }

        let tree = {
            let mut parsers = self.parsers();
            parsers.get_mut(id).and_then(|parser| parser.parse(code, None))
        };
        self.report(tree.ok_or_else(|| GrammarError::Parse(id.to_string())))
    }

    pub async fn get_available_languages(&self) -> Result<Vec<String>> {
        self.wait_for_init().await?;
        self.store.list().await
    }

    pub async fn is_language_available(&self, id: &str) -> Result<bool> {
        self.wait_for_init().await?;
        Ok(self.store.is_available(id).await)
    }

    /// Version recorded when `id` was installed through this service.
    pub async fn installed_version(&self, id: &str) -> Result<Option<String>> {
        self.wait_for_init().await?;
        Ok(self.document.lock().await.installed.get(id).cloned())
    }

    /// Install `id` from the registry. `false` if it was already installed.
    pub async fn install_language(&self, id: &str) -> Result<bool> {
        self.wait_for_init().await?;
        let outcome = self.report(self.installer.install(id, &default_wanted()).await)?;
        let InstallOutcome::Installed { version, .. } = outcome else {
            return Ok(false);
        };

        let recorded = self.record_install(id, version).await;
        self.evict(id);
        if let Err(e) = recorded {
            warn!(grammar = %id, error = %e, "Could not record install, rolling back");
            if let Err(cleanup) = self.installer.uninstall(id).await {
                warn!(grammar = %id, error = %cleanup, "Rollback failed");
            }
            return self.report(Err(e));
        }

        self.events.emit(GrammarEvent::LanguageInstalled(id.to_string()));
        Ok(true)
    }

    /// Persist the installed version. The in-memory document only changes
    /// once the save succeeded.
    async fn record_install(&self, id: &str, version: String) -> Result<()> {
        let mut document = self.document.lock().await;
        let mut updated = document.clone();
        updated.installed.insert(id.to_string(), version);
        if updated.registry.is_none() {
            updated.registry = Some(self.settings.registry_url.clone());
        }
        updated.save(&self.settings.config_document_path()).await?;
        *document = updated;
        Ok(())
    }

    /// Delete `id` from disk and from both caches. `false` if it was not installed.
    pub async fn uninstall_language(&self, id: &str) -> Result<bool> {
        self.wait_for_init().await?;
        let result = self.installer.uninstall(id).await;
        self.evict(id);
        if !self.report(result)? {
            return Ok(false);
        }

        {
            let mut document = self.document.lock().await;
            if document.installed.remove(id).is_some() {
                let saved = document.save(&self.settings.config_document_path()).await;
                self.report(saved)?;
            }
        }

        self.events.emit(GrammarEvent::LanguageUninstalled(id.to_string()));
        Ok(true)
    }

    fn evict(&self, id: &str) {
        self.languages().remove(id);
        self.parsers().remove(id);
    }

    /// Drop every cached handle and parser. Disk is untouched.
    pub fn clear(&self) {
        self.languages().clear();
        self.parsers().clear();
    }

    /// Unload every cached grammar, then [`clear`](Self::clear).
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.languages().values().cloned().collect();
        for handle in handles {
            handle.unload_grammar().await;
            if let Some(extensions) = handle.extensions() {
                for ext in extensions.values() {
                    ext.unload_grammar().await;
                }
            }
        }
        self.clear();
        debug!("Grammar service shut down");
    }
}
