use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ig_micropub::config::{parse_bool, Config};
use ig_micropub::extract::{filter_by_date, order_oldest_first, DateRange};
use ig_micropub::micropub::{MicropubSite, PublishJob};
use ig_micropub::pipeline::{collect_records, run_jobs, RunMode};
use ig_micropub::sources::{ArchiveSource, EmbedSource, PostSource, ProfileSource};
use ig_micropub::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "ig-micropub", version)]
#[command(about = "Republish Instagram posts to a Micropub site")]
struct Cli {
    /// Config file: JSON, or TOML when it ends in .toml
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish posts found in a HAR capture
    Har {
        #[arg(value_parser = parse_har_path)]
        file: PathBuf,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Publish posts from a profile page
    Profile {
        /// Profile to read; defaults to `user` from the config
        user: Option<String>,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Publish individual posts by URL
    Posts {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Publish date for every post (YYYY/MM/DD or an ISO datetime)
        #[arg(short = 'd', long = "date", value_parser = parse_datetime)]
        date: Option<DateTime<Utc>>,
        #[command(flatten)]
        publish: PublishArgs,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// First day to publish (YYYY/MM/DD)
    #[arg(long, value_parser = parse_date)]
    from: NaiveDate,
    /// Last day to publish, inclusive (YYYY/MM/DD)
    #[arg(long, value_parser = parse_date)]
    to: NaiveDate,
}

#[derive(Args)]
struct PublishArgs {
    /// Create entries instead of printing what would be posted
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    commit: bool,
    /// Ask the site to syndicate each entry
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    syndicate: bool,
}

impl PublishArgs {
    fn mode(&self) -> RunMode {
        if self.commit {
            RunMode::Commit
        } else {
            RunMode::DryRun
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_tracing()?;

    // Everything below is validated before the first request goes out.
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;
    info!(endpoint = %config.endpoint, "Configuration loaded");

    let (source, range, date, publish) = match cli.command {
        Commands::Har {
            file,
            range,
            publish,
        } => (
            Box::new(ArchiveSource::from_path(file)) as Box<dyn PostSource>,
            Some(date_range(&range)?),
            None,
            publish,
        ),
        Commands::Profile {
            user,
            range,
            publish,
        } => {
            let Some(user) = user.or_else(|| config.user.clone()) else {
                bail!("No profile given and no `user` in the configuration");
            };
            (
                Box::new(ProfileSource::new(user)) as Box<dyn PostSource>,
                Some(date_range(&range)?),
                None,
                publish,
            )
        }
        Commands::Posts {
            urls,
            date,
            publish,
        } => (
            Box::new(EmbedSource::new(urls)) as Box<dyn PostSource>,
            None,
            date,
            publish,
        ),
    };

    let transport = HttpTransport::new(config.timeout()).context("Failed to create HTTP client")?;

    let mut records = collect_records(source.as_ref(), &transport)
        .await
        .with_context(|| format!("Failed to read posts from {}", source.source_id()))?;
    if let Some(range) = range {
        records = filter_by_date(records, &range);
        info!(
            from = %range.start(),
            to = %range.end(),
            records = records.len(),
            "Filtered by date"
        );
    }
    order_oldest_first(&mut records);

    if records.is_empty() {
        info!("No posts to publish");
        return Ok(());
    }

    let mode = publish.mode();
    let site = match mode {
        RunMode::Commit => MicropubSite::connect(&config.endpoint, config.token.as_str(), &transport)
            .await
            .context("Failed to connect to the Micropub endpoint")?,
        RunMode::DryRun => MicropubSite::new(&config.endpoint, config.token.as_str(), &transport)
            .context("Invalid Micropub endpoint")?,
    }
    .with_syndication_targets(config.syndicate_to.clone());

    let jobs: Vec<PublishJob> = records
        .into_iter()
        .map(|record| PublishJob::new(record, publish.syndicate).with_published(date))
        .collect();
    let total = jobs.len();

    let report = run_jobs(&site, jobs, mode).await;
    for (code, url) in &report.published {
        info!(code = %code, url = %url, "Published");
    }
    if report.has_failures() {
        for failure in &report.failures {
            error!(code = %failure.code, step = %failure.step, reason = %failure.reason, "Post failed");
        }
        bail!("{} of {total} posts failed", report.failures.len());
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ig_micropub=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

fn date_range(args: &RangeArgs) -> Result<DateRange> {
    DateRange::new(args.from, args.to).context("Invalid date range")
}

fn parse_flag(value: &str) -> Result<bool, String> {
    parse_bool("flag", value).map_err(|_| format!("expected yes/no, true/false or 1/0, got '{value}'"))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    ["%Y/%m/%d", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value.trim(), fmt).ok())
        .ok_or_else(|| format!("expected a date like 2023/01/31, got '{value}'"))
}

/// A date (midnight UTC) or an ISO datetime. Datetimes without an offset are
/// taken as UTC.
fn parse_datetime(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(naive) = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Ok(naive.and_utc());
    }
    parse_date(value)
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| format!("expected a date or ISO datetime, got '{value}'"))
}

fn parse_har_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    let is_har = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("har"));
    if is_har {
        Ok(path)
    } else {
        Err(format!("'{value}' is not a .har file"))
    }
}
