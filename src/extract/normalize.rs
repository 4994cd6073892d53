//! Map post fragments of every known shape onto [`PostRecord`].
//!
//! Three shapes are handled:
//!
//! - the private API shape seen in HAR captures (`code`, `caption`,
//!   `image_versions2`, `carousel_media`, `taken_at`),
//! - the legacy GraphQL shape embedded in profile pages (`shortcode`,
//!   `edge_media_to_caption`, `display_url`, `edge_sidecar_to_children`,
//!   `taken_at_timestamp`),
//! - posts scraped from detail and embed HTML ([`ScrapedPost`]).
//!
//! Every field is read through a priority-ordered list of attempts; the first
//! one that yields a value wins. A missing or mistyped key only ever makes an
//! attempt fail, never the batch.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::model::PostRecord;
use super::{Fragment, ScrapedPost};

type Attempt<T> = fn(&Value) -> Option<T>;

/// Matches the code segment of a post, reel or TV detail URL.
static DETAIL_URL_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"instagram\.com/(?:[A-Za-z0-9_.]+/)?(?:p|reel|tv)/([A-Za-z0-9_-]+)")
        .expect("valid regex")
});

const CODE_ATTEMPTS: &[Attempt<String>] = &[
    |n| non_empty_str(n.get("code")),
    |n| non_empty_str(n.get("shortcode")),
    |n| {
        ["permalink", "link", "url", "post_url"]
            .iter()
            .find_map(|key| n.get(*key).and_then(Value::as_str).and_then(code_from_url))
    },
];

/// Caption containers, API shape first.
const CAPTION_ATTEMPTS: &[Attempt<CaptionContainer>] = &[
    |n| caption_container(n.get("caption")?),
    |n| caption_container(n.pointer("/edge_media_to_caption/edges/0/node")?),
];

const TIMESTAMP_ATTEMPTS: &[Attempt<DateTime<Utc>>] = &[
    |n| epoch(n.pointer("/caption/created_at")?),
    |n| epoch(n.get("taken_at")?),
    |n| epoch(n.get("taken_at_timestamp")?),
];

const CAROUSEL_ATTEMPTS: &[Attempt<Vec<String>>] = &[
    |n| carousel(n.get("carousel_media")?.as_array()?.iter()),
    |n| {
        let edges = n.pointer("/edge_sidecar_to_children/edges")?.as_array()?;
        carousel(edges.iter().filter_map(|edge| edge.get("node")))
    },
];

const SINGLE_IMAGE_ATTEMPTS: &[Attempt<String>] = &[
    |n| representative(n.pointer("/image_versions2/candidates")?, Variants::FirstIsLargest),
    |n| representative(n.get("display_resources")?, Variants::LastIsLargest),
    |n| non_empty_str(n.get("display_url")),
    |n| non_empty_str(n.get("thumbnail_src")),
];

const VIDEO_ATTEMPTS: &[Attempt<String>] = &[
    |n| non_empty_str(n.pointer("/video_versions/0/url")),
    |n| non_empty_str(n.get("video_url")),
];

/// Normalize any fragment. `None` means "incomplete, skip it".
#[must_use]
pub fn normalize(fragment: &Fragment) -> Option<PostRecord> {
    match fragment {
        Fragment::Node(node) => normalize_node(node),
        Fragment::Scraped(post) => normalize_scraped(post),
    }
}

/// Normalize a JSON node payload (API or GraphQL shape).
#[must_use]
pub fn normalize_node(node: &Value) -> Option<PostRecord> {
    if !node.is_object() {
        return None;
    }

    let code = first_of(node, CODE_ATTEMPTS)?;

    // Posts without caption metadata are not publishable.
    let Some(caption) = first_of(node, CAPTION_ATTEMPTS) else {
        debug!(code = %code, "Discarding post without caption");
        return None;
    };

    let media_urls = first_of(node, CAROUSEL_ATTEMPTS)
        .or_else(|| first_of(node, SINGLE_IMAGE_ATTEMPTS).map(|url| vec![url]));
    let Some(media_urls) = media_urls else {
        debug!(code = %code, "Discarding post without images");
        return None;
    };

    let video_url = first_of(node, VIDEO_ATTEMPTS);
    let is_video = node
        .get("is_video")
        .and_then(Value::as_bool)
        .or_else(|| node.get("media_type").and_then(Value::as_i64).map(|t| t == 2))
        .unwrap_or(video_url.is_some());

    Some(PostRecord {
        code,
        caption_text: caption.text,
        created_at: first_of(node, TIMESTAMP_ATTEMPTS),
        is_video,
        video_url,
        media_urls,
    })
}

/// Normalize a post scraped from HTML.
#[must_use]
pub fn normalize_scraped(post: &ScrapedPost) -> Option<PostRecord> {
    let code = post.code.trim();
    if code.is_empty() {
        return None;
    }
    let Some(caption) = post.caption.as_deref() else {
        debug!(code = %code, "Discarding scraped post without caption");
        return None;
    };

    let media_urls: Vec<String> = post
        .image_urls
        .iter()
        .filter(|url| !url.is_empty())
        .cloned()
        .collect();
    if media_urls.is_empty() {
        return None;
    }

    Some(PostRecord {
        code: code.to_string(),
        caption_text: Some(caption.to_string()),
        created_at: None,
        is_video: false,
        video_url: None,
        media_urls,
    })
}

/// Extract a post code from a detail page URL.
#[must_use]
pub fn code_from_url(url: &str) -> Option<String> {
    DETAIL_URL_CODE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Largest image of a single media node, if it has one.
#[must_use]
pub fn representative_image(node: &Value) -> Option<String> {
    first_of(node, SINGLE_IMAGE_ATTEMPTS)
}

fn first_of<T>(node: &Value, attempts: &[Attempt<T>]) -> Option<T> {
    attempts.iter().find_map(|attempt| attempt(node))
}

struct CaptionContainer {
    text: Option<String>,
}

fn caption_container(value: &Value) -> Option<CaptionContainer> {
    let map = value.as_object()?;
    if map.is_empty() {
        return None;
    }
    Some(CaptionContainer {
        text: map.get("text").and_then(Value::as_str).map(str::to_string),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Epoch seconds as integer, float or numeric string.
fn epoch(value: &Value) -> Option<DateTime<Utc>> {
    let seconds = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(truncate_seconds))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(truncate_seconds))?,
        _ => return None,
    };
    DateTime::from_timestamp(seconds, 0)
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_seconds(seconds: f64) -> i64 {
    seconds.trunc() as i64
}

/// Which end of an unsized variant list holds the biggest image.
#[derive(Clone, Copy)]
enum Variants {
    FirstIsLargest,
    LastIsLargest,
}

/// Pick the largest variant of an image.
///
/// Declared dimensions win; otherwise fall back to the list's convention.
fn representative(list: &Value, order: Variants) -> Option<String> {
    let variants: Vec<(&str, Option<u64>)> = list
        .as_array()?
        .iter()
        .filter_map(|v| {
            let url = v
                .get("url")
                .or_else(|| v.get("src"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())?;
            Some((url, area(v)))
        })
        .collect();

    if variants.iter().any(|(_, area)| area.is_some()) {
        let mut best: Option<(&str, u64)> = None;
        for (url, area) in &variants {
            let area = area.unwrap_or(0);
            if best.is_none_or(|(_, best_area)| area > best_area) {
                best = Some((*url, area));
            }
        }
        return best.map(|(url, _)| url.to_string());
    }

    let pick = match order {
        Variants::FirstIsLargest => variants.first(),
        Variants::LastIsLargest => variants.last(),
    };
    pick.map(|(url, _)| (*url).to_string())
}

fn area(variant: &Value) -> Option<u64> {
    let dim = |a: &str, b: &str| variant.get(a).or_else(|| variant.get(b)).and_then(Value::as_u64);
    Some(dim("width", "config_width")?.saturating_mul(dim("height", "config_height")?))
}

/// One representative image per carousel child. `None` when empty.
fn carousel<'a>(children: impl Iterator<Item = &'a Value>) -> Option<Vec<String>> {
    let urls: Vec<String> = children
        .filter_map(representative_image)
        .collect();
    (!urls.is_empty()).then_some(urls)
}
