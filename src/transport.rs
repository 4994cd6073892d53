//! HTTP transport used by the sources and the Micropub publisher.
//!
//! The extraction and publishing code only ever talks to a [`Transport`]; the
//! reqwest-backed [`HttpTransport`] is what the binary wires in.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::constants::BROWSER_USER_AGENT;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("GET {url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
}

/// Longest slice of a response body quoted in an error reason.
const MAX_REASON_CHARS: usize = 300;

/// Status, headers and body of a POST response.
#[derive(Debug, Clone)]
pub struct PostResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PostResponse {
    /// The `Location` header, if present and valid UTF-8.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Why the server answered the way it did: the status phrase, followed
    /// by whatever explanation the server put in the body.
    ///
    /// Micropub errors are JSON with `error` and `error_description`; any
    /// other non-empty body is quoted as text, cut to a few hundred chars.
    #[must_use]
    pub fn reason(&self) -> String {
        let phrase = self
            .status
            .canonical_reason()
            .map_or_else(|| self.status.as_str().to_string(), str::to_string);
        match self.server_message() {
            Some(message) => format!("{phrase}: {message}"),
            None => phrase,
        }
    }

    fn server_message(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
            let field = |key: &str| {
                json.get(key)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            if let Some(message) = field("error_description").or_else(|| field("error")) {
                return Some(message);
            }
        }

        Some(text.chars().take(MAX_REASON_CHARS).collect())
    }
}

/// The two network capabilities the core consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a URL and return the body. Non-success statuses are errors.
    async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, TransportError>;

    /// POST a body and return the status and headers, whatever the status.
    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Result<PostResponse, TransportError>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { client })
    }
}

fn header_map(headers: &[(&str, &str)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                name: (*name).to_string(),
                message: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                name: (*name).to_string(),
                message: e.to_string(),
            })?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>, TransportError> {
        debug!(url = %url, "GET");
        let request_error = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .headers(header_map(headers)?)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        Ok(body.to_vec())
    }

    async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Result<PostResponse, TransportError> {
        debug!(url = %url, bytes = body.len(), "POST");
        let response = self
            .client
            .post(url)
            .headers(header_map(headers)?)
            .body(body)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        Ok(PostResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_rejects_bad_names() {
        assert!(header_map(&[("Authorization", "Bearer x")]).is_ok());
        assert!(header_map(&[("bad header", "x")]).is_err());
    }

    #[test]
    fn test_post_response_helpers() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://example.com/e/1"));
        let response = PostResponse {
            status: StatusCode::CREATED,
            headers,
            body: Vec::new(),
        };
        assert_eq!(response.location(), Some("https://example.com/e/1"));
        assert_eq!(response.reason(), "Created");

        let forbidden = PostResponse {
            status: StatusCode::FORBIDDEN,
            headers: HeaderMap::new(),
            body: b"  \n".to_vec(),
        };
        assert_eq!(forbidden.location(), None);
        assert_eq!(forbidden.reason(), "Forbidden");
    }

    fn rejected(status: StatusCode, body: &str) -> PostResponse {
        PostResponse {
            status,
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_reason_carries_server_explanation() {
        let micropub_error = rejected(
            StatusCode::BAD_REQUEST,
            r#"{"error": "invalid_request", "error_description": "photo is not a URL"}"#,
        );
        assert_eq!(micropub_error.reason(), "Bad Request: photo is not a URL");

        let bare_error = rejected(StatusCode::UNAUTHORIZED, r#"{"error": "unauthorized"}"#);
        assert_eq!(bare_error.reason(), "Unauthorized: unauthorized");

        let text = rejected(StatusCode::FORBIDDEN, "token lacks the create scope\n");
        assert_eq!(text.reason(), "Forbidden: token lacks the create scope");

        let long = rejected(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(1_000));
        assert_eq!(
            long.reason().len(),
            "Internal Server Error: ".len() + MAX_REASON_CHARS
        );
    }
}
