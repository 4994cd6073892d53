//! Posts listed on a profile page.
//!
//! The profile HTML carries its initial state as a JSON assignment inside a
//! script tag; the first page of the timeline is read from it.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::traits::{PostSource, SourceError};
use crate::constants::{profile_url, BROWSER_USER_AGENT};
use crate::extract::Fragment;
use crate::transport::Transport;

const STATE_MARKER: &str = "window._sharedData = ";
const TIMELINE_POINTER: &str = "/entry_data/ProfilePage/0/graphql/user/edge_owner_to_timeline_media";

/// Source scraping the public profile page of one user.
pub struct ProfileSource {
    user: String,
}

impl ProfileSource {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        profile_url(&self.user)
    }
}

#[async_trait]
impl PostSource for ProfileSource {
    fn source_id(&self) -> &'static str {
        "profile"
    }

    async fn fetch_fragments(
        &self,
        transport: &dyn Transport,
    ) -> Result<Vec<Fragment>, SourceError> {
        let url = self.url();
        info!(url = %url, "Reading profile page");
        let body = transport
            .fetch(&url, &[("User-Agent", BROWSER_USER_AGENT)])
            .await?;
        let html = String::from_utf8_lossy(&body);
        fragments_from_profile(&html, &url)
    }
}

/// Extract timeline nodes from profile markup.
///
/// # Errors
///
/// Fails when the state script cannot be found or does not have the
/// expected structure; no partial profile data is usable in that case.
pub fn fragments_from_profile(html: &str, url: &str) -> Result<Vec<Fragment>, SourceError> {
    let blob = extract_state_blob(html).ok_or_else(|| SourceError::MarkerNotFound {
        url: url.to_string(),
    })?;

    let state: Value =
        serde_json::from_str(blob).map_err(|e| SourceError::InvalidEmbeddedData {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let timeline = state
        .pointer(TIMELINE_POINTER)
        .ok_or_else(|| SourceError::InvalidEmbeddedData {
            url: url.to_string(),
            message: "timeline media not found".to_string(),
        })?;

    let edges = timeline
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::InvalidEmbeddedData {
            url: url.to_string(),
            message: "timeline edges missing".to_string(),
        })?;

    if timeline
        .pointer("/page_info/has_next_page")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let cursor = timeline
            .pointer("/page_info/end_cursor")
            .and_then(Value::as_str)
            .unwrap_or_default();
        warn!(
            url = %url,
            end_cursor = %cursor,
            "Profile has more posts than the embedded first page"
        );
    }

    let fragments: Vec<Fragment> = edges
        .iter()
        .filter_map(|edge| edge.get("node"))
        .cloned()
        .map(Fragment::Node)
        .collect();
    info!(posts = fragments.len(), "Found posts on profile page");
    Ok(fragments)
}

/// Find the state JSON, scanning line by line for the script assignment.
fn extract_state_blob(html: &str) -> Option<&str> {
    html.lines()
        .filter(|line| line.contains("<script"))
        .find_map(|line| {
            let start = line.find(STATE_MARKER)? + STATE_MARKER.len();
            let rest = &line[start..];
            let end = rest.find(";</script>").unwrap_or_else(|| rest.trim_end().len());
            Some(rest[..end].trim_end_matches(';').trim())
        })
}
