//! End-to-end tests through the public service API.
//!
//! Each test runs against a temp storage root, an in-memory registry and an
//! engine that hands out the statically linked JSON grammar.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use grammarian::{
    GrammarEngine, GrammarError, GrammarEvent, GrammarService, HttpClient, HttpResponse, LoadOptions, Settings,
};
use tree_sitter::{Language, Parser};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const REGISTRY: &str = "https://registry.test";

#[derive(Default)]
struct Registry {
    responses: HashMap<String, Vec<u8>>,
    fail_on: Option<usize>,
    downloads: AtomicUsize,
}

impl Registry {
    fn file(mut self, url: String, body: &[u8]) -> Self {
        self.responses.insert(url, body.to_vec());
        self
    }

    fn fail_on_download(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }
}

#[async_trait]
impl HttpClient for Registry {
    async fn get(&self, url: &str) -> grammarian::Result<HttpResponse> {
        if !url.ends_with("?meta") {
            let n = self.downloads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(n) {
                return Err(GrammarError::Http {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }
        Ok(match self.responses.get(url) {
            Some(body) => HttpResponse { status: 200, body: body.clone() },
            None => HttpResponse { status: 404, body: Vec::new() },
        })
    }
}

/// Registry with `tree-sitter-json@0.24.8`: three wanted files and one that is not.
fn json_registry() -> Registry {
    let manifest = r#"{"files":[{"path":"/tree-sitter.json"},{"path":"/tree-sitter-json.wasm"},{"path":"/queries/highlights.scm"},{"path":"/package.json"}],"prefix":"/","version":"0.24.8"}"#;
    let base = format!("{REGISTRY}/tree-sitter-json@0.24.8");
    Registry::default()
        .file(format!("{REGISTRY}/tree-sitter-json@latest?meta"), manifest.as_bytes())
        .file(format!("{base}/tree-sitter.json"), br#"{"grammars":[{"name":"json","scope":"source.json"}]}"#)
        .file(format!("{base}/tree-sitter-json.wasm"), b"\0asm\x01\0\0\0")
        .file(format!("{base}/queries/highlights.scm"), b"(string) @string\n")
        .file(format!("{base}/package.json"), br#"{"name":"tree-sitter-json"}"#)
}

struct JsonEngine;

#[async_trait]
impl GrammarEngine for JsonEngine {
    async fn bootstrap(&self) -> grammarian::Result<()> {
        Ok(())
    }

    fn load_language(&self, _name: &str, _module: &[u8]) -> grammarian::Result<Language> {
        Ok(tree_sitter_json::LANGUAGE.into())
    }

    fn configure_parser(&self, _parser: &mut Parser) -> grammarian::Result<()> {
        Ok(())
    }
}

fn service(root: &Path, registry: Registry) -> Arc<GrammarService> {
    let mut settings = Settings::new(root);
    settings.registry_url = REGISTRY.to_string();
    GrammarService::new(settings, Arc::new(JsonEngine), Arc::new(registry))
}

fn files_under(dir: &Path) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap();
                out.insert(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Install json from the registry: exactly the wanted files land on disk and the grammar parses.
#[tokio::test]
async fn install_json_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), json_registry());

    assert!(!svc.is_language_available("json").await.unwrap());
    assert!(svc.install_language("json").await.unwrap());
    assert!(svc.is_language_available("json").await.unwrap());

    let dir = tmp.path().join("tree-sitter").join("json");
    let expected: BTreeSet<String> = ["tree-sitter.json", "tree-sitter-json.wasm", "queries/highlights.scm"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(files_under(&dir), expected);

    let handle = svc.get_language("json", LoadOptions::default()).await.unwrap().unwrap();
    assert_eq!(handle.query("highlights"), Some("(string) @string\n"));
    assert_eq!(handle.config().grammars[0].scope.as_deref(), Some("source.json"));

    let tree = svc.parse("json", r#"{"ok": true}"#, LoadOptions::default()).await.unwrap();
    assert_eq!(tree.root_node().kind(), "document");
}

/// A second install is a no-op that leaves the existing directory alone.
#[tokio::test]
async fn reinstall_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), json_registry());

    assert!(svc.install_language("json").await.unwrap());
    let marker = tmp.path().join("tree-sitter").join("json").join("local.scm");
    std::fs::write(&marker, "; local").unwrap();

    assert!(!svc.install_language("json").await.unwrap());
    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "; local");
}

/// Failing any single download leaves nothing installed.
#[tokio::test]
async fn failed_download_leaves_nothing_behind() {
    for n in 1..=3 {
        let tmp = tempfile::tempdir().unwrap();
        let svc = service(tmp.path(), json_registry().fail_on_download(n));
        let mut events = svc.subscribe();

        assert!(svc.install_language("json").await.is_err());
        assert!(!svc.is_language_available("json").await.unwrap());
        assert!(!tmp.path().join("tree-sitter").join("json").exists());

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, GrammarEvent::LanguageInstalled(_)));
            saw_error |= matches!(event, GrammarEvent::Error(_));
        }
        assert!(saw_error, "download {n} failure was not reported");
    }
}

/// Manifest entries outside the declared prefix abort the install by default.
#[tokio::test]
async fn prefix_mismatch_aborts_install() {
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = json_registry();
    registry.responses.insert(
        format!("{REGISTRY}/tree-sitter-json@latest?meta"),
        br#"{"files":[{"path":"elsewhere/tree-sitter.json"}],"prefix":"/package/","version":"0.24.8"}"#.to_vec(),
    );
    let svc = service(tmp.path(), registry);

    let err = svc.install_language("json").await.unwrap_err();
    assert!(matches!(err, GrammarError::PrefixMismatch { .. }));
    assert!(!svc.is_language_available("json").await.unwrap());
}

/// After uninstalling, the cached handle is gone and lookups return None.
#[tokio::test]
async fn uninstall_then_lookup_returns_none() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), json_registry());

    svc.install_language("json").await.unwrap();
    let handle = svc.get_language("json", LoadOptions::default()).await.unwrap();
    assert!(handle.is_some());

    assert!(svc.uninstall_language("json").await.unwrap());
    assert!(svc.get_language("json", LoadOptions::default()).await.unwrap().is_none());
    assert!(!svc.is_language_available("json").await.unwrap());
    assert!(svc.get_available_languages().await.unwrap().is_empty());
    assert!(matches!(
        svc.parse("json", "{}", LoadOptions::default()).await,
        Err(GrammarError::NotInstalled(_))
    ));
}

/// A package shipping a dialect module resolves into a container with one leaf extension.
#[tokio::test]
async fn dialect_modules_become_extensions() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tree-sitter").join("foo");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("tree-sitter.json"), r#"{"grammars":[{"name":"foo"}]}"#).unwrap();
    std::fs::write(dir.join("tree-sitter-foo.wasm"), b"primary").unwrap();
    std::fs::write(dir.join("tree-sitter-foo-bar.wasm"), b"dialect").unwrap();

    let svc = service(tmp.path(), Registry::default());
    let handle = svc.get_language("foo", LoadOptions::default()).await.unwrap().unwrap();

    assert_eq!(handle.module().unwrap().file_name, "tree-sitter-foo.wasm");
    let extensions = handle.extensions().unwrap();
    assert_eq!(extensions.len(), 1);
    let bar = &extensions["foo-bar"];
    assert!(bar.is_extension());
    assert!(bar.extensions().is_none());

    let grammar = bar.load_grammar().await.unwrap();
    assert!(Arc::ptr_eq(&grammar, &bar.load_grammar().await.unwrap()));
}

/// Installed versions survive a restart through the configuration document.
#[tokio::test]
async fn installed_version_persists_across_services() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), json_registry());
    svc.install_language("json").await.unwrap();
    drop(svc);

    let svc = service(tmp.path(), Registry::default());
    assert_eq!(svc.installed_version("json").await.unwrap().as_deref(), Some("0.24.8"));
    assert_eq!(svc.get_available_languages().await.unwrap(), vec!["json".to_string()]);
}
