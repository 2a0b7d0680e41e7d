//! Fetching a single package file to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::debug;

use crate::error::{GrammarError, Result};
use crate::registry::HttpClient;
use crate::store::MODULE_EXTENSION;

/// How a downloaded payload is decoded before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Structured document, parsed to check it is well formed.
    Document,
    /// Compiled grammar module, kept byte for byte.
    Binary,
    /// Plain text, written unchanged once it is known to be UTF-8.
    Text,
}

impl ReadMode {
    pub fn for_file(file_name: &str) -> Self {
        match file_name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("json") => ReadMode::Document,
            Some(ext) if ext == MODULE_EXTENSION => ReadMode::Binary,
            _ => ReadMode::Text,
        }
    }
}

/// Base name of the file a URL points at, ignoring any query string.
fn remote_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Download `url` into `destination` under the remote base name.
pub async fn download_file(
    http: &dyn HttpClient,
    url: &str,
    destination: &Path,
    timeout: Duration,
) -> Result<PathBuf> {
    let file_name = remote_file_name(url).ok_or_else(|| GrammarError::Http {
        url: url.to_string(),
        reason: "url has no file name".to_string(),
    })?;

    let response = tokio::time::timeout(timeout, http.get(url))
        .await
        .map_err(|_| GrammarError::DownloadTimeout {
            url: url.to_string(),
            timeout,
        })??;
    if !response.is_success() {
        return Err(GrammarError::Http {
            url: url.to_string(),
            reason: format!("status {}", response.status),
        });
    }
    if response.body.is_empty() {
        return Err(GrammarError::DownloadEmpty { url: url.to_string() });
    }

    let contents = match ReadMode::for_file(file_name) {
        ReadMode::Binary => response.body,
        ReadMode::Document => {
            let value: serde_json::Value =
                serde_json::from_slice(&response.body).map_err(|e| GrammarError::Http {
                    url: url.to_string(),
                    reason: format!("invalid document: {e}"),
                })?;
            if value.is_null() {
                return Err(GrammarError::DownloadEmpty { url: url.to_string() });
            }
            response.body
        }
        ReadMode::Text => {
            if let Err(e) = std::str::from_utf8(&response.body) {
                return Err(GrammarError::Http {
                    url: url.to_string(),
                    reason: format!("invalid UTF-8 text: {e}"),
                });
            }
            response.body
        }
    };

    let path = destination.join(file_name);
    fs::write(&path, &contents)
        .await
        .map_err(|e| GrammarError::io(&path, e))?;
    debug!(%url, path = %path.display(), bytes = contents.len(), "Downloaded file");
    Ok(path)
}
