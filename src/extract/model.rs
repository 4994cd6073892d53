use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::constants;

/// One post, normalized from whichever source produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    /// Short code, unique per source post.
    pub code: String,
    pub caption_text: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub is_video: bool,
    /// Recorded for reference only; videos are never uploaded.
    pub video_url: Option<String>,
    /// Never empty. The first entry is the primary image.
    pub media_urls: Vec<String>,
}

impl PostRecord {
    /// Canonical detail page URL, also used as the syndication URL.
    #[must_use]
    pub fn detail_url(&self) -> String {
        constants::detail_url(&self.code)
    }

    #[must_use]
    pub fn embed_url(&self) -> String {
        constants::embed_url(&self.code)
    }

    #[must_use]
    pub fn primary_media(&self) -> &str {
        self.media_urls.first().map_or("", String::as_str)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("start date {start} is after end date {end}")]
    StartAfterEnd { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar dates, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting a start that falls after the end.
    ///
    /// # Errors
    ///
    /// Returns an error if `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Whether the record's creation date is inside the range.
    ///
    /// Records without a timestamp are never inside any range.
    #[must_use]
    pub fn contains(&self, record: &PostRecord) -> bool {
        record.created_at.is_some_and(|ts| {
            let date = ts.date_naive();
            self.start <= date && date <= self.end
        })
    }
}
