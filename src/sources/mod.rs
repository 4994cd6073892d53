//! Post sources: HAR captures, profile pages and single post pages.

mod archive;
mod embed;
mod profile;
mod traits;

pub use archive::{fragments_from_har, ArchiveSource};
pub use embed::{scrape_post, EmbedSource};
pub use profile::{fragments_from_profile, ProfileSource};
pub use traits::{PostSource, SourceError};
