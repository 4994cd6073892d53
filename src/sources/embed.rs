//! Single posts scraped from their detail and embed pages.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, error, info};

use super::traits::{PostSource, SourceError};
use crate::constants::{detail_url, embed_url, BROWSER_USER_AGENT};
use crate::extract::normalize::representative_image;
use crate::extract::{code_from_url, Fragment, ScrapedPost};
use crate::transport::Transport;

/// Meta tags that carry the caption, most reliable first.
const CAPTION_SELECTORS: &[&str] = &[
    r#"meta[property="og:title"]"#,
    r#"meta[property="og:description"]"#,
    r#"meta[name="description"]"#,
];

static EMBED_IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img.EmbeddedMediaImage").expect("valid selector"));

static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("valid selector"));

/// The embed page hands its data to the module loader in this call.
static HANDLE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)s\.handle\((.*?)\);requireLazy").expect("valid regex"));

const SIDECAR_POINTER: &str = "/context/media/edge_sidecar_to_children/edges";

/// Source scraping a list of post URLs.
pub struct EmbedSource {
    urls: Vec<String>,
}

impl EmbedSource {
    #[must_use]
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    /// Scrape one post.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not a post URL, a page cannot be
    /// fetched, or the embed page has no image.
    pub async fn fetch_post(
        &self,
        transport: &dyn Transport,
        url: &str,
    ) -> Result<ScrapedPost, SourceError> {
        let code = code_from_url(url).ok_or_else(|| SourceError::InvalidPostUrl(url.to_string()))?;
        let headers = [("User-Agent", BROWSER_USER_AGENT)];

        let detail = detail_url(&code);
        info!(url = %detail, "Reading post page");
        let detail_html = transport.fetch(&detail, &headers).await?;

        let embed = embed_url(&code);
        debug!(url = %embed, "Reading embed page");
        let embed_html = transport.fetch(&embed, &headers).await?;

        scrape_post(
            &code,
            &String::from_utf8_lossy(&detail_html),
            &String::from_utf8_lossy(&embed_html),
            &embed,
        )
    }
}

#[async_trait]
impl PostSource for EmbedSource {
    fn source_id(&self) -> &'static str {
        "posts"
    }

    /// Scrape every URL. A failing post is logged and skipped; the call only
    /// fails when no post could be scraped at all.
    async fn fetch_fragments(
        &self,
        transport: &dyn Transport,
    ) -> Result<Vec<Fragment>, SourceError> {
        let mut fragments = Vec::with_capacity(self.urls.len());
        let mut last_error = None;

        for url in &self.urls {
            match self.fetch_post(transport, url).await {
                Ok(post) => fragments.push(Fragment::Scraped(post)),
                Err(e) => {
                    error!(url = %url, error = %e, "Failed to read post");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if fragments.is_empty() => Err(e),
            _ => Ok(fragments),
        }
    }
}

/// Combine what the detail and embed pages tell about one post.
///
/// # Errors
///
/// Returns an error if the embed page has no primary image.
pub fn scrape_post(
    code: &str,
    detail_html: &str,
    embed_html: &str,
    embed_page_url: &str,
) -> Result<ScrapedPost, SourceError> {
    let caption = extract_caption(detail_html);

    let embed = Html::parse_document(embed_html);
    let primary = embed
        .select(&EMBED_IMAGE_SELECTOR)
        .find_map(|img| img.value().attr("src"))
        .filter(|src| !src.is_empty())
        .ok_or_else(|| SourceError::MissingPrimaryImage {
            url: embed_page_url.to_string(),
        })?
        .to_string();

    let children: Vec<String> = embed
        .select(&SCRIPT_SELECTOR)
        .map(|script| script.text().collect::<String>())
        .find_map(|js| sidecar_images(&js))
        .unwrap_or_default();

    // Sidecar children already include the primary image.
    let image_urls = if children.is_empty() {
        vec![primary]
    } else {
        children
    };

    debug!(code = %code, images = image_urls.len(), has_caption = caption.is_some(), "Scraped post");
    Ok(ScrapedPost {
        code: code.to_string(),
        caption,
        image_urls,
    })
}

/// Caption text from the detail page meta tags, without the
/// `"<user> on Instagram: "` prefix and surrounding quotes.
fn extract_caption(detail_html: &str) -> Option<String> {
    let document = Html::parse_document(detail_html);

    CAPTION_SELECTORS.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        let content = document
            .select(&selector)
            .find_map(|meta| meta.value().attr("content"))?
            .trim();
        let text = strip_caption_prefix(content);
        (!text.is_empty()).then(|| text.to_string())
    })
}

fn strip_caption_prefix(content: &str) -> &str {
    let text = content.split_once(": ").map_or(content, |(_, rest)| rest);
    text.trim()
        .trim_start_matches(['"', '\u{201c}'])
        .trim_end_matches(['"', '\u{201d}'])
        .trim()
}

/// Display URLs of sidecar children described in an embed script.
fn sidecar_images(js: &str) -> Option<Vec<String>> {
    let payload = HANDLE_CALL.captures(js)?.get(1)?.as_str();
    let data: Value = serde_json::from_str(payload)
        .map_err(|e| debug!(error = %e, "Embed script payload is not JSON"))
        .ok()?;

    let images: Vec<String> = context_json_strings(&data)
        .into_iter()
        .filter_map(|raw| serde_json::from_str::<Value>(raw).ok())
        .find_map(|context| {
            let edges = context.pointer(SIDECAR_POINTER)?.as_array()?;
            let urls: Vec<String> = edges
                .iter()
                .filter_map(|edge| edge.get("node"))
                .filter_map(representative_image)
                .collect();
            (!urls.is_empty()).then_some(urls)
        })?;

    Some(images)
}

/// Every string stored under a `contextJSON` key, in document order.
fn context_json_strings(root: &Value) -> Vec<&str> {
    let mut found = Vec::new();
    let mut stack = vec![root];

    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                if let Some(raw) = map.get("contextJSON").and_then(Value::as_str) {
                    found.push(raw);
                }
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }

    found
}
