//! Posts captured in a HAR (HTTP Archive) document.
//!
//! Browsers export every response seen while scrolling a profile; the post
//! lists live in the JSON bodies of the GraphQL/API responses.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::traits::{PostSource, SourceError};
use crate::extract::{find_nodes, Fragment};
use crate::transport::Transport;

#[derive(Debug, Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    entries: Vec<HarEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HarEntry {
    response: HarResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HarResponse {
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HarContent {
    mime_type: Option<String>,
    text: Option<String>,
    encoding: Option<String>,
}

enum Input {
    Path(PathBuf),
    Document(String),
}

/// Source reading a HAR file or an in-memory HAR document.
pub struct ArchiveSource {
    input: Input,
}

impl ArchiveSource {
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            input: Input::Path(path.as_ref().to_path_buf()),
        }
    }

    #[must_use]
    pub fn from_document(document: impl Into<String>) -> Self {
        Self {
            input: Input::Document(document.into()),
        }
    }

    async fn read(&self) -> Result<String, SourceError> {
        match &self.input {
            Input::Path(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| SourceError::Io {
                        path: path.display().to_string(),
                        source,
                    })
            }
            Input::Document(document) => Ok(document.clone()),
        }
    }
}

#[async_trait]
impl PostSource for ArchiveSource {
    fn source_id(&self) -> &'static str {
        "har"
    }

    async fn fetch_fragments(
        &self,
        _transport: &dyn Transport,
    ) -> Result<Vec<Fragment>, SourceError> {
        let document = self.read().await?;
        let fragments = fragments_from_har(&document)?;
        info!(fragments = fragments.len(), "Scanned capture document");
        Ok(fragments)
    }
}

/// Extract node fragments from every JSON response body, in capture order.
///
/// # Errors
///
/// Returns an error if the document is not a HAR log. Individual entries that
/// cannot be decoded are skipped, including bodies nested deeper than the
/// JSON parser's depth limit (128 levels).
pub fn fragments_from_har(document: &str) -> Result<Vec<Fragment>, SourceError> {
    let har: Har =
        serde_json::from_str(document).map_err(|e| SourceError::InvalidCapture(e.to_string()))?;

    let mut fragments = Vec::new();
    for (index, entry) in har.log.entries.iter().enumerate() {
        let Some(body) = decode_body(&entry.response.content) else {
            continue;
        };
        match serde_json::from_str::<Value>(&body) {
            Ok(json) => {
                let nodes = find_nodes(&json);
                if !nodes.is_empty() {
                    debug!(entry = index, nodes = nodes.len(), "Found nodes in response");
                }
                fragments.extend(nodes.into_iter().cloned().map(Fragment::Node));
            }
            Err(e) => {
                debug!(entry = index, error = %e, "Skipping unparseable response body");
            }
        }
    }

    Ok(fragments)
}

/// Response body text if it looks like JSON, base64-decoded when needed.
fn decode_body(content: &HarContent) -> Option<String> {
    let text = content.text.as_deref().filter(|t| !t.is_empty())?;

    let body = if content.encoding.as_deref() == Some("base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .ok()?;
        String::from_utf8_lossy(&bytes).into_owned()
    } else {
        text.to_string()
    };

    let declared_json = content
        .mime_type
        .as_deref()
        .is_some_and(|m| m.contains("json"));
    let trimmed = body.trim();
    let looks_like_json = trimmed.starts_with('{') && trimmed.ends_with('}');

    (declared_json || looks_like_json).then_some(body)
}
