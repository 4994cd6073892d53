//! Shared constants used across the application.

/// User agent string used when scraping Instagram pages and media.
///
/// Instagram serves a stripped-down page to unknown clients, so requests
/// identify as a regular desktop browser.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:71.0) Gecko/20100101 Firefox/71.0";

/// Profile page URL prefix; the username is appended.
pub const PROFILE_URL_PREFIX: &str = "https://www.instagram.com/";

/// Canonical detail page URL prefix; `{code}/` is appended.
pub const DETAIL_URL_PREFIX: &str = "https://www.instagram.com/p/";

/// Suffix turning a detail URL into its embeddable variant.
pub const EMBED_SUFFIX: &str = "embed/";

/// Build the canonical detail URL for a post code.
#[must_use]
pub fn detail_url(code: &str) -> String {
    format!("{DETAIL_URL_PREFIX}{code}/")
}

/// Build the embed page URL for a post code.
#[must_use]
pub fn embed_url(code: &str) -> String {
    format!("{DETAIL_URL_PREFIX}{code}/{EMBED_SUFFIX}")
}

/// Build the profile page URL for a username.
#[must_use]
pub fn profile_url(user: &str) -> String {
    format!("{PROFILE_URL_PREFIX}{}", user.trim_matches('/'))
}
