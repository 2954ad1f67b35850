use std::time::Duration;

use thiserror::Error;

/// Failure of a single fetch operation: a page load, a scope, or a lookup.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid selector '{0}'")]
    Selector(String),

    #[error("no element matches '{0}'")]
    NoMatch(String),

    #[error("could not open fetch scope: {0}")]
    Scope(String),
}

impl FetchError {
    /// Collapse transport timeouts into the same variant as our own deadlines.
    pub fn from_reqwest(err: reqwest::Error, limit: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(limit)
        } else {
            FetchError::Http(err)
        }
    }
}

/// Storage failure. The pipeline logs these and moves on to the next job.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Run-level failures.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("listing page {url} could not be fetched: {source}")]
    ListingFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_shows_seconds() {
        let e = FetchError::Timeout(Duration::from_millis(1500));
        assert_eq!(e.to_string(), "timed out after 1.5s");
    }

    #[test]
    fn listing_fetch_keeps_source() {
        let e = CrawlError::ListingFetch {
            url: "https://uk.indeed.com/jobs?q=dev".into(),
            source: FetchError::Status {
                status: 503,
                url: "https://uk.indeed.com/jobs?q=dev".into(),
            },
        };
        assert!(e.to_string().contains("HTTP 503"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
