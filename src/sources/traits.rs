use async_trait::async_trait;
use thiserror::Error;

use crate::extract::{normalize, Fragment, PostRecord};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid capture document: {0}")]
    InvalidCapture(String),
    #[error("embedded data marker not found in {url}; the page format has changed")]
    MarkerNotFound { url: String },
    #[error("embedded data in {url} is unusable: {message}")]
    InvalidEmbeddedData { url: String, message: String },
    #[error("not an Instagram post URL: {0}")]
    InvalidPostUrl(String),
    #[error("no image found in embed page {url}")]
    MissingPrimaryImage { url: String },
}

/// A producer of post fragments.
///
/// One implementation per concrete source format; the pipeline picks one and
/// drives it through the same two steps.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Short identifier used in logs.
    fn source_id(&self) -> &'static str;

    /// Collect raw fragments, in source order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the source as a whole is unusable.
    async fn fetch_fragments(
        &self,
        transport: &dyn Transport,
    ) -> Result<Vec<Fragment>, SourceError>;

    /// Turn one fragment into a record, or `None` to skip it.
    fn normalize_fragment(&self, fragment: &Fragment) -> Option<PostRecord> {
        normalize(fragment)
    }
}
