//! Job-listing crawl pipeline.
//!
//! The walker pulls one listing page at a time, turns it into stubs, enriches
//! each new stub from its detail page and hands the record to a [`ResultSink`].
//! Everything runs sequentially with a randomized pause between jobs.

pub mod dedup;
pub mod detail;
pub mod listing;
pub mod pacing;
pub mod pagination;
pub mod sink;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{CrawlError, FetchError};
use crate::fetcher::{FetchScope, PageFetcher};
use crate::report::ReportWriter;

pub use dedup::DedupGate;
pub use detail::RetryPolicy;
pub use pagination::{PaginationWalker, WalkEvent, WalkOutcome};
pub use sink::{PersistOutcome, ResultSink};

/// Not-found sentinel for any field that could not be extracted.
pub const UNKNOWN: &str = "unknown";

static HSPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Minimal data captured from one listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStub {
    pub list_title: String,
    pub detail_url: Url,
}

/// Fields read from a detail page. Missing ones hold [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
}

impl JobDetails {
    pub fn unknown() -> Self {
        Self {
            title: UNKNOWN.into(),
            company: UNKNOWN.into(),
            location: UNKNOWN.into(),
            description: UNKNOWN.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        [&self.title, &self.company, &self.location, &self.description]
            .iter()
            .all(|f| !is_unknown(f))
    }
}

/// The durable unit handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: String,
}

impl JobRecord {
    /// Combine a stub with its details, falling back to the listing title.
    pub fn from_details(stub: &JobStub, details: JobDetails) -> Self {
        let title = if is_unknown(&details.title) {
            stub.list_title.clone()
        } else {
            details.title
        };
        Self {
            title,
            company: details.company,
            location: details.location,
            description: details.description,
            url: stub.detail_url.to_string(),
        }
    }

    /// True when nothing but the URL is known.
    pub fn is_degraded(&self) -> bool {
        [&self.title, &self.company, &self.location, &self.description]
            .iter()
            .all(|f| is_unknown(f))
    }
}

pub fn is_unknown(value: &str) -> bool {
    value == UNKNOWN
}

/// Tidy extracted text. Blank or "N/A" input becomes [`UNKNOWN`].
pub fn normalize_text(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n");
    let text = HSPACE_RE.replace_all(&text, " ");
    let text = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    let text = BLANKS_RE.replace_all(&text, "\n\n");
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("n/a") {
        UNKNOWN.to_string()
    } else {
        text.to_string()
    }
}

/// Load `url` in `scope`, bounded by `limit` even if the fetcher ignores it.
pub(crate) async fn load_with_deadline<S: FetchScope>(
    scope: &mut S,
    url: &Url,
    limit: Duration,
) -> Result<S::Page, FetchError> {
    match tokio::time::timeout(limit, scope.load(url, limit)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}

/// Counters for one run.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub start_url: String,
    pub outcome: WalkOutcome,
    pub pages: usize,
    pub stubs: usize,
    pub duplicates: usize,
    pub records: usize,
    pub degraded: usize,
    pub persisted: usize,
    pub already_stored: usize,
    pub persist_errors: usize,
    pub elapsed: Duration,
}

impl CrawlSummary {
    fn new(start_url: &Url) -> Self {
        Self {
            start_url: start_url.to_string(),
            outcome: WalkOutcome::Done,
            pages: 0,
            stubs: 0,
            duplicates: 0,
            records: 0,
            degraded: 0,
            persisted: 0,
            already_stored: 0,
            persist_errors: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn print(&self) {
        println!(
            "{} pages, {} listings ({} duplicates skipped).",
            self.pages, self.stubs, self.duplicates
        );
        println!(
            "{} records ({} without details): {} saved, {} already stored, {} errors.",
            self.records, self.degraded, self.persisted, self.already_stored, self.persist_errors
        );
        match &self.outcome {
            WalkOutcome::Done => println!("Run finished."),
            WalkOutcome::Failed(reason) => println!("Run stopped early: {}", reason),
        }
    }
}

/// Crawl from the configured search URL until pagination ends.
///
/// Only an invalid configuration is returned as an error. A listing page that
/// cannot be fetched ends the run with [`WalkOutcome::Failed`] in the summary,
/// keeping every record produced before it.
pub async fn run<F, S>(
    fetcher: &F,
    sink: &S,
    settings: &Settings,
    mut report: Option<&mut ReportWriter>,
    mut on_record: impl FnMut(&JobRecord),
) -> Result<CrawlSummary, CrawlError>
where
    F: PageFetcher,
    S: ResultSink,
{
    settings.validate()?;
    let start = settings.search_url()?;
    let started = Instant::now();

    let mut gate = DedupGate::new();
    if settings.skip_known {
        match sink.known_urls() {
            Ok(urls) => {
                gate.preload(urls);
                info!("Skipping {} URLs stored by earlier runs", gate.preloaded());
            }
            Err(e) => warn!("Could not load stored URLs, cross-run dedup disabled: {}", e),
        }
    }

    let mut summary = CrawlSummary::new(&start);
    info!("Starting crawl at {}", start);

    let walker = PaginationWalker::new(fetcher, settings)?;
    let events = walker.walk(start, &mut gate);
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        match event {
            WalkEvent::PageLoaded { url, stubs } => {
                debug!(%url, stubs, "Listing page processed");
                summary.pages += 1;
                summary.stubs += stubs;
            }
            WalkEvent::Duplicate { url } => {
                debug!(%url, "Duplicate skipped");
                summary.duplicates += 1;
            }
            WalkEvent::Record(record) => {
                summary.records += 1;
                if record.is_degraded() {
                    summary.degraded += 1;
                }
                match sink.persist(&record) {
                    Ok(PersistOutcome::Inserted) => summary.persisted += 1,
                    Ok(PersistOutcome::AlreadyStored) => summary.already_stored += 1,
                    Err(e) => {
                        warn!("Failed to save {}: {}", record.url, e);
                        summary.persist_errors += 1;
                    }
                }
                if let Some(writer) = report.as_deref_mut() {
                    if let Err(e) = writer.write_record(&record) {
                        warn!("Failed to append {} to report: {}", record.url, e);
                    }
                }
                on_record(&record);
            }
            WalkEvent::Finished(outcome) => summary.outcome = outcome,
        }
    }

    summary.elapsed = started.elapsed();
    info!(
        pages = summary.pages,
        records = summary.records,
        persisted = summary.persisted,
        "Crawl finished"
    );
    Ok(summary)
}
