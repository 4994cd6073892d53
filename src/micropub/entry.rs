use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use super::{MicropubSite, PublishError};
use crate::extract::PostRecord;

/// One record on its way to the site. Consumed by [`PublishJob::publish`]
/// or [`PublishJob::preview`].
#[derive(Debug, Clone)]
pub struct PublishJob {
    record: PostRecord,
    published: Option<DateTime<Utc>>,
    syndicate: bool,
}

impl PublishJob {
    /// Publish with the record's own creation time.
    #[must_use]
    pub fn new(record: PostRecord, syndicate: bool) -> Self {
        let published = record.created_at;
        Self {
            record,
            published,
            syndicate,
        }
    }

    /// Override the publish time; `None` keeps the record's own.
    #[must_use]
    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published.or(self.record.created_at);
        self
    }

    #[must_use]
    pub fn record(&self) -> &PostRecord {
        &self.record
    }

    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    /// Upload every image, then create the entry. Returns the entry URL.
    ///
    /// Images go up one at a time in order; the first failure aborts the job
    /// before the entry is created.
    ///
    /// # Errors
    ///
    /// Returns the first upload failure or the entry rejection.
    pub async fn publish(self, site: &MicropubSite<'_>) -> Result<String, PublishError> {
        debug!(code = %self.record.code, images = self.record.media_urls.len(), "Uploading images");
        let mut uploaded = Vec::with_capacity(self.record.media_urls.len());
        for url in &self.record.media_urls {
            uploaded.push(site.upload_media(url).await?);
        }

        let fields = self.fields(site, &uploaded).await?;
        let entry_url = site.submit_entry(&fields).await?;
        info!(code = %self.record.code, url = %entry_url, "Entry created");
        Ok(entry_url)
    }

    /// The fields [`publish`](Self::publish) would send, with the source
    /// image URLs standing in for uploaded ones. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if syndication targets cannot be discovered.
    pub async fn preview(self, site: &MicropubSite<'_>) -> Result<EntryFields, PublishError> {
        self.fields(site, &self.record.media_urls).await
    }

    async fn fields(
        &self,
        site: &MicropubSite<'_>,
        photos: &[String],
    ) -> Result<EntryFields, PublishError> {
        let targets = if self.syndicate {
            site.syndication_targets().await?
        } else {
            Vec::new()
        };
        Ok(EntryFields::build(
            &self.record,
            photos,
            self.published,
            &targets,
        ))
    }
}

/// Ordered form fields of a Micropub entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFields {
    pairs: Vec<(String, String)>,
}

impl EntryFields {
    /// Build the entry for a record.
    ///
    /// The first photo becomes `photo`; the others are appended to the
    /// content as markdown images.
    #[must_use]
    pub fn build(
        record: &PostRecord,
        photos: &[String],
        published: Option<DateTime<Utc>>,
        syndicate_to: &[String],
    ) -> Self {
        let mut content = record.caption_text.clone().unwrap_or_default();
        let (main_photo, more_photos) = photos
            .split_first()
            .map_or((None, &[][..]), |(first, rest)| (Some(first), rest));
        if !more_photos.is_empty() {
            let images: Vec<String> = more_photos.iter().map(|url| format!("![]({url})")).collect();
            content.push_str("\n\n");
            content.push_str(&images.join("\n"));
        }

        let mut pairs = vec![
            ("content".to_string(), content),
            ("h".to_string(), "entry".to_string()),
        ];
        if let Some(photo) = main_photo {
            pairs.push(("photo".to_string(), photo.clone()));
        }
        pairs.push(("syndication".to_string(), record.detail_url()));
        pairs.extend(
            syndicate_to
                .iter()
                .map(|target| ("mp-syndicate-to".to_string(), target.clone())),
        );
        if let Some(published) = published {
            pairs.push((
                "published".to_string(),
                published.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        Self { pairs }
    }

    /// First value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a field, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn form_encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.pairs)
            .finish()
    }
}

impl fmt::Display for EntryFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.pairs {
            if value.contains('\n') {
                writeln!(f, "{name}:")?;
                for line in value.lines() {
                    writeln!(f, "    {line}")?;
                }
            } else {
                writeln!(f, "{name}: {value}")?;
            }
        }
        if self.get("published").is_none() {
            writeln!(f, "(no date, the site will use the submission time)")?;
        }
        Ok(())
    }
}
