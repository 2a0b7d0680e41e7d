//! Remote package registry: manifest lookup and URL construction.
//!
//! The registry serves one package per grammar, named `tree-sitter-<id>`. A
//! `?meta` request on `<base>/tree-sitter-<id>@<version>` returns the flat
//! file listing for that version; file bytes live under the same URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GrammarError, Result};

pub const LATEST: &str = "latest";

/// Response from the HTTP bridge.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP bridge used for every registry request.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let http_err = |e: reqwest::Error| GrammarError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(http_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(http_err)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// One file listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
}

/// Manifest of one resolved package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
    /// Shared prefix of every entry path, stripped before pattern matching.
    pub prefix: String,
    /// The concrete version the registry resolved the request to.
    pub version: String,
}

#[derive(Deserialize)]
struct RawManifest {
    files: Vec<ManifestEntry>,
    #[serde(default)]
    prefix: String,
    version: Option<String>,
}

#[derive(Clone)]
pub struct RegistryClient {
    base: String,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient").field("base", &self.base).finish()
    }
}

impl RegistryClient {
    pub fn new(base: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, http }
    }

    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    /// `<base>/tree-sitter-<id>@<version>[/<path>]`.
    ///
    /// Individual files must be addressed with the version a manifest
    /// resolved to, never `latest`.
    pub fn build_url(&self, id: &str, path: &str, version: &str) -> String {
        let package = format!("{}/tree-sitter-{id}@{version}", self.base);
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            package
        } else {
            format!("{package}/{path}")
        }
    }

    pub fn manifest_url(&self, id: &str, version: &str) -> String {
        format!("{}?meta", self.build_url(id, "", version))
    }

    pub async fn fetch_manifest(&self, id: &str, version: &str) -> Result<Manifest> {
        let url = self.manifest_url(id, version);
        debug!(grammar = %id, %url, "Fetching manifest");

        let fetch_err = |reason: String| GrammarError::ManifestFetch {
            url: url.clone(),
            reason,
        };

        let response = self.http.get(&url).await.map_err(|e| fetch_err(e.to_string()))?;
        if !response.is_success() {
            return Err(fetch_err(format!("status {}", response.status)));
        }
        let raw: RawManifest =
            serde_json::from_slice(&response.body).map_err(|e| fetch_err(e.to_string()))?;

        Ok(Manifest {
            files: raw.files,
            prefix: raw.prefix,
            version: raw.version.unwrap_or_else(|| version.to_string()),
        })
    }
}
