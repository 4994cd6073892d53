//! Micropub client: capability discovery, media upload and entry creation.

mod entry;
pub mod multipart;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::constants::BROWSER_USER_AGENT;
use crate::transport::{Transport, TransportError};

pub use entry::{EntryFields, PublishJob};

/// Syndication targets used when neither the config nor the server names any.
pub const DEFAULT_SYNDICATION_TARGETS: &[&str] = &["twitter", "mastodon"];

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid Micropub endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
    #[error("capability discovery failed: {0}")]
    Discovery(#[source] TransportError),
    #[error("capability response is not valid JSON: {0}")]
    InvalidConfig(#[source] serde_json::Error),
    #[error("Micropub config has no media-endpoint")]
    MissingMediaEndpoint,
    #[error("failed to upload {url}: {reason}")]
    MediaUpload { url: String, reason: String },
    #[error("entry rejected with {status}: {reason}")]
    EntryRejected { status: u16, reason: String },
    #[error("entry submission failed: {0}")]
    EntryTransport(#[source] TransportError),
    #[error("server accepted the request but sent no Location header")]
    MissingLocation,
}

impl PublishError {
    /// Which publishing step this error belongs to.
    #[must_use]
    pub fn step(&self) -> PublishStep {
        match self {
            Self::MediaUpload { .. } => PublishStep::MediaUpload,
            Self::InvalidEndpoint { .. }
            | Self::Discovery(_)
            | Self::InvalidConfig(_)
            | Self::MissingMediaEndpoint => PublishStep::Discovery,
            Self::EntryRejected { .. } | Self::EntryTransport(_) | Self::MissingLocation => {
                PublishStep::EntrySubmission
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    Discovery,
    MediaUpload,
    EntrySubmission,
}

impl std::fmt::Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Discovery => "discovery",
            Self::MediaUpload => "media upload",
            Self::EntrySubmission => "entry submission",
        })
    }
}

/// Parsed `?q=config` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MicropubConfig {
    #[serde(rename = "media-endpoint")]
    pub media_endpoint: Option<String>,
    #[serde(rename = "syndicate-to", default)]
    pub syndicate_to: Vec<SyndicationTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyndicationTarget {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Discovered configuration with the media endpoint resolved.
#[derive(Debug, Clone)]
pub struct SiteCapabilities {
    pub media_endpoint: String,
    pub syndicate_to: Vec<SyndicationTarget>,
}

/// A Micropub site: endpoint, bearer token, and its cached capabilities.
pub struct MicropubSite<'t> {
    endpoint: Url,
    token: String,
    transport: &'t dyn Transport,
    capabilities: OnceCell<SiteCapabilities>,
    syndication_override: Vec<String>,
}

impl<'t> MicropubSite<'t> {
    /// Create a session; capabilities are discovered on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL.
    pub fn new(
        endpoint: &str,
        token: impl Into<String>,
        transport: &'t dyn Transport,
    ) -> Result<Self, PublishError> {
        let endpoint = Url::parse(endpoint).map_err(|e| PublishError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            endpoint,
            token: token.into(),
            transport,
            capabilities: OnceCell::new(),
            syndication_override: Vec::new(),
        })
    }

    /// Create a session and discover its capabilities right away.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the site has no media endpoint.
    pub async fn connect(
        endpoint: &str,
        token: impl Into<String>,
        transport: &'t dyn Transport,
    ) -> Result<Self, PublishError> {
        let site = Self::new(endpoint, token, transport)?;
        site.capabilities().await?;
        Ok(site)
    }

    /// Syndication targets to use instead of the server's.
    #[must_use]
    pub fn with_syndication_targets(mut self, targets: Vec<String>) -> Self {
        self.syndication_override = targets;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Site capabilities, fetched once per session.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the media endpoint is missing.
    pub async fn capabilities(&self) -> Result<&SiteCapabilities, PublishError> {
        self.capabilities
            .get_or_try_init(|| self.discover())
            .await
    }

    async fn discover(&self) -> Result<SiteCapabilities, PublishError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("q", "config");
        debug!(url = %url, "Discovering Micropub config");

        let bearer = self.bearer();
        let body = self
            .transport
            .fetch(url.as_str(), &[("Authorization", bearer.as_str())])
            .await
            .map_err(PublishError::Discovery)?;

        let config: MicropubConfig =
            serde_json::from_slice(&body).map_err(PublishError::InvalidConfig)?;
        let media_endpoint = config
            .media_endpoint
            .filter(|e| !e.is_empty())
            .ok_or(PublishError::MissingMediaEndpoint)?;
        let media_endpoint = self.resolve(&media_endpoint);

        info!(media_endpoint = %media_endpoint, targets = config.syndicate_to.len(), "Micropub config discovered");
        Ok(SiteCapabilities {
            media_endpoint,
            syndicate_to: config.syndicate_to,
        })
    }

    /// Resolve a possibly relative URL against the Micropub endpoint.
    fn resolve(&self, url: &str) -> String {
        self.endpoint
            .join(url)
            .map_or_else(|_| url.to_string(), String::from)
    }

    /// Targets sent as `mp-syndicate-to` when syndicating.
    ///
    /// # Errors
    ///
    /// Returns an error if capabilities cannot be discovered.
    pub async fn syndication_targets(&self) -> Result<Vec<String>, PublishError> {
        if !self.syndication_override.is_empty() {
            return Ok(self.syndication_override.clone());
        }
        let advertised = &self.capabilities().await?.syndicate_to;
        if advertised.is_empty() {
            Ok(DEFAULT_SYNDICATION_TARGETS
                .iter()
                .map(|t| (*t).to_string())
                .collect())
        } else {
            Ok(advertised.iter().map(|t| t.uid.clone()).collect())
        }
    }

    /// Download one image and upload it to the media endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails or the endpoint does not
    /// answer `201 Created` with a `Location`.
    pub async fn upload_media(&self, source_url: &str) -> Result<String, PublishError> {
        let media_endpoint = self.capabilities().await?.media_endpoint.clone();
        let upload_error = |reason: String| PublishError::MediaUpload {
            url: source_url.to_string(),
            reason,
        };

        debug!(url = %source_url, "Downloading image");
        let data = self
            .transport
            .fetch(source_url, &[("User-Agent", BROWSER_USER_AGENT)])
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        let filename = multipart::filename_from_url(source_url);
        let body = multipart::encode(&data, &filename);
        let bearer = self.bearer();
        let content_type = multipart::content_type();

        debug!(endpoint = %media_endpoint, filename = %filename, bytes = data.len(), "Uploading image");
        let response = self
            .transport
            .post(
                &media_endpoint,
                body,
                &[("Authorization", bearer.as_str()), ("Content-Type", content_type.as_str())],
            )
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        if response.status.as_u16() != 201 {
            return Err(upload_error(format!(
                "{} {}",
                response.status.as_u16(),
                response.reason()
            )));
        }
        let location = response
            .location()
            .ok_or_else(|| upload_error("no Location header".to_string()))?;
        let media_url = resolve_against(&media_endpoint, location);
        debug!(url = %media_url, "Uploaded image");
        Ok(media_url)
    }

    /// Submit an entry. Returns the new entry URL.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the server's reason if the entry is not
    /// created.
    pub async fn submit_entry(&self, fields: &EntryFields) -> Result<String, PublishError> {
        let bearer = self.bearer();
        info!(endpoint = %self.endpoint, "Posting entry");
        let response = self
            .transport
            .post(
                self.endpoint.as_str(),
                fields.form_encode().into_bytes(),
                &[
                    ("Authorization", bearer.as_str()),
                    ("Content-Type", "application/x-www-form-urlencoded"),
                ],
            )
            .await
            .map_err(PublishError::EntryTransport)?;

        if response.status.as_u16() != 201 {
            return Err(PublishError::EntryRejected {
                status: response.status.as_u16(),
                reason: response.reason(),
            });
        }
        let location = response.location().ok_or(PublishError::MissingLocation)?;
        Ok(self.resolve(location))
    }
}

fn resolve_against(base: &str, url: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(url))
        .map_or_else(|_| url.to_string(), String::from)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport recording every request.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
    use reqwest::StatusCode;

    use crate::transport::{PostResponse, Transport, TransportError};

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    #[derive(Default)]
    pub struct FakeTransport {
        pages: HashMap<String, Vec<u8>>,
        post_replies: Mutex<Vec<(u16, Option<String>, Vec<u8>)>>,
        pub gets: Mutex<Vec<Recorded>>,
        pub posts: Mutex<Vec<Recorded>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.pages.insert(url.to_string(), body.into());
            self
        }

        /// Queue a reply for the next POST.
        pub fn reply(self, status: u16, location: Option<&str>) -> Self {
            self.reply_with_body(status, location, "")
        }

        pub fn reply_with_body(self, status: u16, location: Option<&str>, body: &str) -> Self {
            self.post_replies.lock().unwrap().push((
                status,
                location.map(str::to_string),
                body.as_bytes().to_vec(),
            ));
            self
        }

        pub fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    fn record(url: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Recorded {
        Recorded {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body,
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch(
            &self,
            url: &str,
            headers: &[(&str, &str)],
        ) -> Result<Vec<u8>, TransportError> {
            self.gets.lock().unwrap().push(record(url, headers, Vec::new()));
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Status {
                    url: url.to_string(),
                    status: StatusCode::NOT_FOUND,
                })
        }

        async fn post(
            &self,
            url: &str,
            body: Vec<u8>,
            headers: &[(&str, &str)],
        ) -> Result<PostResponse, TransportError> {
            self.posts.lock().unwrap().push(record(url, headers, body));
            let mut replies = self.post_replies.lock().unwrap();
            let (status, location, body) = if replies.is_empty() {
                (500, None, Vec::new())
            } else {
                replies.remove(0)
            };
            let mut headers = HeaderMap::new();
            if let Some(location) = location {
                headers.insert(LOCATION, HeaderValue::from_str(&location).unwrap());
            }
            Ok(PostResponse {
                status: StatusCode::from_u16(status).unwrap(),
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeTransport;
    use super::*;

    const ENDPOINT: &str = "https://blog.example.com/micropub";
    const CONFIG_URL: &str = "https://blog.example.com/micropub?q=config";

    #[tokio::test]
    async fn test_connect_discovers_config_once() {
        let transport = FakeTransport::new().page(
            CONFIG_URL,
            r#"{"media-endpoint": "/micropub/media", "syndicate-to": [{"uid": "https://bsky.app", "name": "Bluesky"}]}"#,
        );
        let site = MicropubSite::connect(ENDPOINT, "tok", &transport).await.unwrap();

        let caps = site.capabilities().await.unwrap();
        assert_eq!(caps.media_endpoint, "https://blog.example.com/micropub/media");
        assert_eq!(site.syndication_targets().await.unwrap(), vec!["https://bsky.app"]);

        let gets = transport.gets.lock().unwrap();
        assert_eq!(gets.len(), 1);
        assert_eq!(
            gets[0].headers,
            vec![("Authorization".to_string(), "Bearer tok".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_media_endpoint_is_a_config_error() {
        let transport = FakeTransport::new().page(CONFIG_URL, r#"{"syndicate-to": []}"#);
        let err = MicropubSite::connect(ENDPOINT, "tok", &transport)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PublishError::MissingMediaEndpoint));
        assert_eq!(err.step(), PublishStep::Discovery);
    }

    #[tokio::test]
    async fn test_syndication_target_precedence() {
        let transport =
            FakeTransport::new().page(CONFIG_URL, r#"{"media-endpoint": "https://m.example.com/"}"#);
        let site = MicropubSite::new(ENDPOINT, "tok", &transport).unwrap();
        assert_eq!(
            site.syndication_targets().await.unwrap(),
            vec!["twitter", "mastodon"]
        );

        let site = site.with_syndication_targets(vec!["custom".to_string()]);
        assert_eq!(site.syndication_targets().await.unwrap(), vec!["custom"]);
    }

    #[tokio::test]
    async fn test_upload_media_sends_multipart() {
        let transport = FakeTransport::new()
            .page(CONFIG_URL, r#"{"media-endpoint": "https://media.example.com/upload"}"#)
            .page("http://cdn.example.com/img/photo.jpg", b"JPEGDATA".to_vec())
            .reply(201, Some("https://media.example.com/f/1.jpg"));
        let site = MicropubSite::new(ENDPOINT, "tok", &transport).unwrap();

        let url = site
            .upload_media("http://cdn.example.com/img/photo.jpg")
            .await
            .unwrap();
        assert_eq!(url, "https://media.example.com/f/1.jpg");

        let posts = transport.posts.lock().unwrap();
        assert_eq!(posts[0].url, "https://media.example.com/upload");
        assert!(posts[0]
            .headers
            .contains(&("Content-Type".to_string(), multipart::content_type())));
        assert_eq!(posts[0].body, multipart::encode(b"JPEGDATA", "photo.jpg"));
    }

    #[tokio::test]
    async fn test_upload_rejection_is_a_media_error() {
        let transport = FakeTransport::new()
            .page(CONFIG_URL, r#"{"media-endpoint": "https://media.example.com/upload"}"#)
            .page("http://cdn.example.com/a.jpg", b"x".to_vec())
            .reply(403, None);
        let site = MicropubSite::new(ENDPOINT, "tok", &transport).unwrap();

        let err = site.upload_media("http://cdn.example.com/a.jpg").await.unwrap_err();
        assert_eq!(err.step(), PublishStep::MediaUpload);
        assert!(err.to_string().contains("403 Forbidden"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let transport = FakeTransport::new();
        assert!(matches!(
            MicropubSite::new("not a url", "tok", &transport),
            Err(PublishError::InvalidEndpoint { .. })
        ));
    }
}
