use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tree_sitter::{Language, Parser};

use crate::engine::GrammarEngine;
use crate::error::{GrammarError, Result};
use crate::language::{GrammarModule, ModuleSource};
use crate::registry::{HttpClient, HttpResponse};

pub const REGISTRY: &str = "https://registry.test";

/// In-memory registry. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeRegistry {
    responses: HashMap<String, HttpResponse>,
    delay: Option<Duration>,
    fail_on: Option<usize>,
    downloads: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn with_manifest(self, url: &str, json: &str) -> Self {
        self.with_file(url, json.as_bytes())
    }

    pub fn with_file(mut self, url: &str, body: &[u8]) -> Self {
        self.responses.insert(
            url.to_string(),
            HttpResponse {
                status: 200,
                body: body.to_vec(),
            },
        );
        self
    }

    /// Delay every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the n-th file download (1-based). Manifest requests are not counted.
    pub fn fail_on_download(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeRegistry {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !url.ends_with("?meta") {
            let n = self.downloads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(GrammarError::Http {
                    url: url.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
        }
        Ok(self.responses.get(url).cloned().unwrap_or(HttpResponse {
            status: 404,
            body: Vec::new(),
        }))
    }
}

/// Registry serving `tree-sitter-<id>` at `version`, with the given module
/// files plus a config document, one query, and files no install wants.
pub fn package_registry(id: &str, version: &str, modules: &[&str]) -> FakeRegistry {
    let mut paths = vec![
        "/package.json".to_string(),
        "/README.md".to_string(),
        "/tree-sitter.json".to_string(),
        "/queries/highlights.scm".to_string(),
    ];
    paths.extend(modules.iter().map(|m| format!("/{m}")));

    let files: Vec<String> = paths.iter().map(|p| format!(r#"{{"path":"{p}"}}"#)).collect();
    let manifest = format!(
        r#"{{"files":[{}],"prefix":"/","version":"{version}"}}"#,
        files.join(",")
    );

    let base = format!("{REGISTRY}/tree-sitter-{id}@{version}");
    let mut registry = FakeRegistry::default()
        .with_manifest(&format!("{REGISTRY}/tree-sitter-{id}@latest?meta"), &manifest)
        .with_file(&format!("{base}/package.json"), br#"{"name":"pkg"}"#)
        .with_file(&format!("{base}/README.md"), b"# readme")
        .with_file(
            &format!("{base}/tree-sitter.json"),
            format!(r#"{{"grammars":[{{"name":"{id}"}}],"metadata":{{"version":"{version}"}}}}"#).as_bytes(),
        )
        .with_file(&format!("{base}/queries/highlights.scm"), b"(string) @string");
    for module in modules {
        registry = registry.with_file(&format!("{base}/{module}"), b"\0asm");
    }
    registry
}

pub fn json_registry() -> FakeRegistry {
    package_registry("json", "0.24.8", &["tree-sitter-json.wasm"])
}

/// Engine that hands out the statically linked JSON grammar for any module
/// whose bytes are not `corrupt`.
#[derive(Default)]
pub struct FakeEngine {
    fail_bootstrap: bool,
    bootstraps: AtomicUsize,
    loads: AtomicUsize,
}

impl FakeEngine {
    pub fn failing() -> Self {
        Self {
            fail_bootstrap: true,
            ..Self::default()
        }
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrammarEngine for FakeEngine {
    async fn bootstrap(&self) -> Result<()> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if self.fail_bootstrap {
            return Err(GrammarError::Init("engine unavailable".to_string()));
        }
        Ok(())
    }

    fn load_language(&self, name: &str, module: &[u8]) -> Result<Language> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if module.is_empty() || module.starts_with(b"corrupt") {
            return Err(GrammarError::GrammarLoad {
                name: name.to_string(),
                reason: "not a wasm module".to_string(),
            });
        }
        Ok(tree_sitter_json::LANGUAGE.into())
    }

    fn configure_parser(&self, _parser: &mut Parser) -> Result<()> {
        Ok(())
    }
}

pub fn bytes_module(file_name: &str, bytes: &[u8]) -> GrammarModule {
    GrammarModule::new(file_name.to_string(), ModuleSource::Bytes(bytes.into()))
}

/// Write an installed package straight to disk.
pub fn write_package(root: &Path, id: &str, modules: &[&str], queries: &[(&str, &str)]) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("tree-sitter.json"),
        format!(r#"{{"grammars":[{{"name":"{id}"}}]}}"#),
    )
    .unwrap();
    for module in modules {
        std::fs::write(dir.join(module), b"\0asm").unwrap();
    }
    if !queries.is_empty() {
        let queries_dir = dir.join("queries");
        std::fs::create_dir_all(&queries_dir).unwrap();
        for (name, text) in queries {
            std::fs::write(queries_dir.join(name), text).unwrap();
        }
    }
}
