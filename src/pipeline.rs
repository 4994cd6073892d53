//! Drives a source through normalization and the publisher.

use tracing::{debug, error, info, info_span, Instrument};

use crate::extract::{dedupe_by_code, PostRecord};
use crate::micropub::{MicropubSite, PublishJob, PublishStep};
use crate::sources::{PostSource, SourceError};
use crate::transport::Transport;

/// Fetch fragments from a source and normalize them, first code wins.
///
/// Fragments that do not describe a post are skipped.
///
/// # Errors
///
/// Returns an error if the source as a whole cannot be read.
pub async fn collect_records(
    source: &dyn PostSource,
    transport: &dyn Transport,
) -> Result<Vec<PostRecord>, SourceError> {
    let fragments = source.fetch_fragments(transport).await?;
    let total = fragments.len();

    let records: Vec<PostRecord> = fragments
        .iter()
        .filter_map(|fragment| {
            let record = source.normalize_fragment(fragment);
            if record.is_none() {
                debug!(source = source.source_id(), "Skipping fragment that is not a post");
            }
            record
        })
        .collect();
    let records = dedupe_by_code(records);

    info!(
        source = source.source_id(),
        fragments = total,
        records = records.len(),
        "Collected post records"
    );
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Show what would be published; no writes.
    DryRun,
    /// Upload media and create entries.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub code: String,
    pub step: PublishStep,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// `(code, entry URL)` for every created entry.
    pub published: Vec<(String, String)>,
    /// Codes previewed in a dry run.
    pub previewed: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl RunReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Publish or preview every job in order. A failing job is logged and
/// recorded; the run continues with the next one.
pub async fn run_jobs(site: &MicropubSite<'_>, jobs: Vec<PublishJob>, mode: RunMode) -> RunReport {
    let span = info_span!("run", endpoint = %site.endpoint(), jobs = jobs.len(), ?mode);
    async move {
        let mut report = RunReport::default();
        for job in jobs {
            let code = job.record().code.clone();
            let job_span = info_span!("job", code = %code);
            run_job(site, job, mode, &mut report).instrument(job_span).await;
        }
        info!(
            published = report.published.len(),
            previewed = report.previewed.len(),
            failed = report.failures.len(),
            "Run finished"
        );
        report
    }
    .instrument(span)
    .await
}

async fn run_job(site: &MicropubSite<'_>, job: PublishJob, mode: RunMode, report: &mut RunReport) {
    let code = job.record().code.clone();
    debug!(
        images = job.record().media_urls.len(),
        primary = %job.record().primary_media(),
        published = ?job.published(),
        "Processing post"
    );
    let result = match mode {
        RunMode::Commit => job.publish(site).await.map(|url| {
            report.published.push((code.clone(), url));
        }),
        RunMode::DryRun => job.preview(site).await.map(|fields| {
            info!("Dry run for {code}, would post to {}:\n{fields}", site.endpoint());
            report.previewed.push(code.clone());
        }),
    };

    if let Err(e) = result {
        let step = e.step();
        error!(code = %code, step = %step, error = %e, "Failed to publish post");
        report.failures.push(JobFailure {
            code,
            step,
            reason: e.to_string(),
        });
    }
}
