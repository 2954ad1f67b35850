use std::time::Duration;

use tracing::{debug, instrument, warn};
use url::Url;

use super::{load_with_deadline, normalize_text, JobDetails, UNKNOWN};
use crate::config::{Selectors, Timeouts};
use crate::error::FetchError;
use crate::fetcher::{Element, FetchScope, Page, PageFetcher};

/// Attempt budget and backoff, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `base * 2^attempt`, saturating.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Reads full job attributes from a detail page.
///
/// Never fails: a page that keeps erroring yields an all-[`UNKNOWN`] record
/// once the attempt budget is spent, and a single missing field only blanks
/// that field.
pub struct DetailFetcher<'a, F> {
    fetcher: &'a F,
    selectors: &'a Selectors,
    timeouts: Timeouts,
    retry: RetryPolicy,
}

impl<'a, F: PageFetcher> DetailFetcher<'a, F> {
    pub fn new(fetcher: &'a F, selectors: &'a Selectors, timeouts: Timeouts, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            selectors,
            timeouts,
            retry,
        }
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> JobDetails {
        let max = self.retry.max_attempts();
        for attempt in 0..max {
            match self.attempt(url).await {
                Ok(details) => {
                    if !details.is_complete() {
                        debug!(?details, "Detail page missing some fields");
                    }
                    return details;
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{}: failed to fetch details for {} - {}",
                        attempt + 1,
                        max,
                        url,
                        e
                    );
                    if attempt + 1 < max {
                        let backoff = self.retry.delay(attempt);
                        debug!("Backing off {:.1}s", backoff.as_secs_f64());
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        warn!("Giving up on {} after {} attempts", url, max);
        JobDetails::unknown()
    }

    /// One isolated attempt. The scope is closed whatever the load did.
    async fn attempt(&self, url: &Url) -> Result<JobDetails, FetchError> {
        let mut scope = self.fetcher.open_scope().await?;
        let result = self.load_and_extract(&mut scope, url).await;
        scope.close().await;
        result
    }

    async fn load_and_extract(&self, scope: &mut F::Scope, url: &Url) -> Result<JobDetails, FetchError> {
        let page = load_with_deadline(scope, url, self.timeouts.page).await?;
        let s = self.selectors;
        let field = self.timeouts.field;
        Ok(JobDetails {
            title: field_text(&page, &s.title, field).await,
            company: field_text(&page, &s.company, field).await,
            location: field_text(&page, &s.location, field).await,
            description: field_text(&page, &s.description, self.timeouts.description).await,
        })
    }
}

/// Text of the first match for `selector`, or [`UNKNOWN`].
async fn field_text<P: Page>(page: &P, selector: &str, limit: Duration) -> String {
    let lookup = async {
        let first = page
            .query(selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::NoMatch(selector.to_string()))?;
        let text = first.text(limit).await?;
        Ok::<String, FetchError>(text)
    };
    match tokio::time::timeout(limit, lookup).await {
        Ok(Ok(text)) => normalize_text(&text),
        Ok(Err(e)) => {
            debug!(selector, error = %e, "Field lookup failed");
            UNKNOWN.to_string()
        }
        Err(_) => {
            debug!(selector, "Field lookup timed out");
            UNKNOWN.to_string()
        }
    }
}
