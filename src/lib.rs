//! Install, cache and load tree-sitter grammars.
//!
//! Grammars are fetched as packages from a registry, stored one directory
//! per grammar id, and loaded on demand into parsers. [`GrammarService`] is
//! the entry point; everything else is reachable through it.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod installer;
pub mod language;
pub mod registry;
pub mod service;
pub mod store;

pub use config::{ConfigDocument, PrefixPolicy, Settings};
pub use engine::{CompiledGrammar, GrammarEngine, WasmEngine};
pub use error::{GrammarError, Result};
pub use events::GrammarEvent;
pub use installer::{InstallOutcome, Installer, WantedItem};
pub use language::{HandleKind, LanguageHandle};
pub use registry::{HttpClient, HttpResponse, RegistryClient, ReqwestClient};
pub use service::{GrammarService, LoadOptions};
pub use store::GrammarStore;

#[cfg(test)]
#[path = "../tests/helpers/mod.rs"]
#[allow(dead_code)]
mod helpers;
