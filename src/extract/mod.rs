//! Locating and normalizing post records.

pub mod locator;
mod model;
pub mod normalize;

use std::collections::HashSet;

use serde_json::Value;

pub use locator::{find_edges, find_nodes};
pub use model::{DateRange, DateRangeError, PostRecord};
pub use normalize::{code_from_url, normalize};

/// A raw, not yet normalized post.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// A `node` payload taken from JSON (API or GraphQL shape).
    Node(Value),
    /// A post recovered from detail and embed HTML.
    Scraped(ScrapedPost),
}

/// Fields recovered by scraping a post's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPost {
    pub code: String,
    pub caption: Option<String>,
    /// Primary image first, then the remaining carousel images.
    pub image_urls: Vec<String>,
}

/// Drop records whose code was already seen, keeping the first.
#[must_use]
pub fn dedupe_by_code(records: Vec<PostRecord>) -> Vec<PostRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.code.clone()))
        .collect()
}

/// Keep records created inside the range.
#[must_use]
pub fn filter_by_date(records: Vec<PostRecord>, range: &DateRange) -> Vec<PostRecord> {
    records.into_iter().filter(|r| range.contains(r)).collect()
}

/// Sort oldest first. Undated records keep their order, after dated ones.
pub fn order_oldest_first(records: &mut [PostRecord]) {
    records.sort_by_key(|r| (r.created_at.is_none(), r.created_at));
}
