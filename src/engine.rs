//! The seam between this crate and the tree-sitter runtime.
//!
//! Grammars ship as WebAssembly modules, so the production engine is
//! [`WasmEngine`]. Anything that can turn module bytes into a
//! [`tree_sitter::Language`] can stand in for it.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tracing::debug;
use tree_sitter::wasmtime;
use tree_sitter::{Language, Parser, WasmError, WasmStore};

use crate::error::{GrammarError, Result};

/// A compiled grammar, shared between a handle and the parsers bound to it.
pub type CompiledGrammar = Arc<Language>;

#[async_trait]
pub trait GrammarEngine: Send + Sync {
    /// One-time engine start-up. Called once by the service before anything else.
    async fn bootstrap(&self) -> Result<()>;

    /// Turn the bytes of a grammar module into a language. `name` is the
    /// module's logical name, e.g. `json` or `typescript-tsx`.
    fn load_language(&self, name: &str, module: &[u8]) -> Result<Language>;

    /// Prepare a fresh parser before a language is assigned to it.
    fn configure_parser(&self, parser: &mut Parser) -> Result<()>;
}

/// Loads `.wasm` grammar modules through tree-sitter's wasmtime integration.
#[derive(Default)]
pub struct WasmEngine {
    engine: OnceLock<wasmtime::Engine>,
    loader: Mutex<Option<WasmStore>>,
}

impl WasmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&self) -> Result<&wasmtime::Engine> {
        self.engine
            .get()
            .ok_or_else(|| GrammarError::Init("wasm engine used before bootstrap".to_string()))
    }
}

/// Exported symbol stem for a module name: `tree_sitter_<name>` with `-` as `_`.
fn symbol_name(name: &str) -> String {
    name.replace('-', "_")
}

fn describe(error: WasmError) -> String {
    format!("{:?}: {}", error.kind, error.message)
}

#[async_trait]
impl GrammarEngine for WasmEngine {
    async fn bootstrap(&self) -> Result<()> {
        if self.engine.get().is_some() {
            return Ok(());
        }
        let engine = tokio::task::spawn_blocking(wasmtime::Engine::default)
            .await
            .map_err(|e| GrammarError::Init(e.to_string()))?;
        let _ = self.engine.set(engine);
        debug!("wasm engine ready");
        Ok(())
    }

    fn load_language(&self, name: &str, module: &[u8]) -> Result<Language> {
        let engine = self.engine()?;
        let mut loader = self.loader.lock().unwrap_or_else(|e| e.into_inner());
        if loader.is_none() {
            let store = WasmStore::new(engine).map_err(|e| GrammarError::load(name, describe(e)))?;
            *loader = Some(store);
        }
        let Some(store) = loader.as_mut() else {
            return Err(GrammarError::load(name, "no wasm store"));
        };
        store
            .load_language(&symbol_name(name), module)
            .map_err(|e| GrammarError::load(name, describe(e)))
    }

    fn configure_parser(&self, parser: &mut Parser) -> Result<()> {
        let store = WasmStore::new(self.engine()?).map_err(|e| GrammarError::load("parser", describe(e)))?;
        parser
            .set_wasm_store(store)
            .map_err(|e| GrammarError::load("parser", e))
    }
}
