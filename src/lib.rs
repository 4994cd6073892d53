//! Instagram to Micropub republisher.
//!
//! Reads posts from a HAR capture, a profile page or individual post pages,
//! normalizes them into [`extract::PostRecord`]s and republishes them to a
//! Micropub site, uploading every image to the site's media endpoint.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod config;
pub mod constants;
pub mod extract;
pub mod micropub;
pub mod pipeline;
pub mod sources;
pub mod transport;
