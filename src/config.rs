use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::crawl::pacing::Pacer;
use crate::crawl::RetryPolicy;
use crate::error::CrawlError;

const DEFAULT_CONFIG_FILE: &str = "crawler";
const ENV_PREFIX: &str = "JOBS";

/// Run parameters. Loaded from defaults, then `crawler.toml`, then `JOBS_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub search_path: String,
    pub query: String,
    pub location: String,
    /// Only jobs posted within this many days (`fromage`).
    pub freshness_days: Option<u32>,

    pub page_timeout_secs: u64,
    pub field_timeout_secs: u64,
    pub description_timeout_secs: u64,

    pub max_attempts: u32,
    pub backoff_base_ms: u64,

    pub min_delay_ms: u64,
    pub max_delay_ms: u64,

    pub max_pages: Option<usize>,
    /// Skip URLs already present in the store from earlier runs.
    pub skip_known: bool,

    pub user_agent: String,
    pub db_path: PathBuf,
    pub selectors: Selectors,
}

/// CSS selectors for the listing and detail pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub listing_item: String,
    pub listing_title: String,
    pub next_page: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            listing_item: ".jcs-JobTitle".into(),
            listing_title: "span[id^='jobTitle']".into(),
            next_page: "a[data-testid='pagination-page-next']".into(),
            title: "h2[data-testid='jobsearch-JobInfoHeader-title']".into(),
            company: "div[data-company-name='true'] a".into(),
            location: "#jobLocationText".into(),
            description: "#jobDescriptionText".into(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://uk.indeed.com".into(),
            search_path: "/jobs".into(),
            query: "developer".into(),
            location: String::new(),
            freshness_days: None,
            page_timeout_secs: 60,
            field_timeout_secs: 5,
            description_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            min_delay_ms: 3000,
            max_delay_ms: 7000,
            max_pages: None,
            skip_known: true,
            user_agent: format!("job_scraper/{}", env!("CARGO_PKG_VERSION")),
            db_path: PathBuf::from("data/jobs.sqlite"),
            selectors: Selectors::default(),
        }
    }
}

/// Per-operation deadlines. The page deadline is looser than the field ones.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub page: Duration,
    pub field: Duration,
    pub description: Duration,
}

impl Settings {
    /// Load settings, using `path` instead of `./crawler.toml` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        let base = self.base()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(CrawlError::Config(format!(
                "base_url must be http(s), got '{}'",
                self.base_url
            )));
        }
        if self.max_attempts == 0 {
            return Err(CrawlError::Config("max_attempts must be at least 1".into()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(CrawlError::Config(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.page_timeout_secs == 0
            || self.field_timeout_secs == 0
            || self.description_timeout_secs == 0
        {
            return Err(CrawlError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn base(&self) -> Result<Url, CrawlError> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn search_url(&self) -> Result<Url, CrawlError> {
        build_search_url(
            &self.base()?,
            &self.search_path,
            &self.query,
            &self.location,
            self.freshness_days,
        )
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            page: Duration::from_secs(self.page_timeout_secs),
            field: Duration::from_secs(self.field_timeout_secs),
            description: Duration::from_secs(self.description_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// `{base}{path}?q=<query>&l=<location>[&fromage=<days>]`, form-encoded.
pub fn build_search_url(
    base: &Url,
    path: &str,
    query: &str,
    location: &str,
    freshness_days: Option<u32>,
) -> Result<Url, CrawlError> {
    let mut url = base.join(path)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("q", query);
        pairs.append_pair("l", location);
        if let Some(days) = freshness_days {
            pairs.append_pair("fromage", &days.to_string());
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Settings::load reads the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn temp_config(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("job_scraper_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("crawler.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.retry_policy().max_attempts(), 3);
        assert_eq!(s.timeouts().page, Duration::from_secs(60));
    }

    #[test]
    fn search_url_encodes_terms() {
        let base = Url::parse("https://uk.indeed.com").unwrap();
        let url = build_search_url(&base, "/jobs", "rust developer", "London", Some(7)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://uk.indeed.com/jobs?q=rust+developer&l=London&fromage=7"
        );
    }

    #[test]
    fn search_url_without_freshness() {
        let base = Url::parse("https://uk.indeed.com/").unwrap();
        let url = build_search_url(&base, "/jobs", "developer", "", None).unwrap();
        assert_eq!(url.as_str(), "https://uk.indeed.com/jobs?q=developer&l=");
    }

    #[test]
    fn rejects_inverted_delay_range() {
        let s = Settings {
            min_delay_ms: 8000,
            max_delay_ms: 3000,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(CrawlError::Config(_))));
    }

    #[test]
    fn rejects_zero_attempts_and_bad_scheme() {
        let s = Settings {
            max_attempts: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());

        let s = Settings {
            base_url: "ftp://example.com".into(),
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_description_timeout() {
        let s = Settings {
            description_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(CrawlError::Config(_))));
    }

    #[test]
    fn loads_from_explicit_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let path = temp_config(
            "cfg",
            "query = \"rust\"\nmax_attempts = 5\n\n[selectors]\nlisting_item = \"a.job\"\n",
        );

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.query, "rust");
        assert_eq!(s.max_attempts, 5);
        assert_eq!(s.selectors.listing_item, "a.job");
        // untouched keys keep their defaults
        assert_eq!(s.selectors.next_page, Selectors::default().next_page);
        assert_eq!(s.min_delay_ms, 3000);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn env_vars_override_file() {
        let _env = ENV_LOCK.lock().unwrap();
        let path = temp_config("env", "query = \"from-file\"\n");
        std::env::set_var("JOBS_QUERY", "rust-env");
        std::env::set_var("JOBS_SELECTORS__LISTING_ITEM", "a.env-job");

        let loaded = Settings::load(Some(&path));
        std::env::remove_var("JOBS_QUERY");
        std::env::remove_var("JOBS_SELECTORS__LISTING_ITEM");
        std::fs::remove_file(&path).ok();

        let s = loaded.unwrap();
        assert_eq!(s.query, "rust-env");
        assert_eq!(s.selectors.listing_item, "a.env-job");
        assert_eq!(s.selectors.next_page, Selectors::default().next_page);
    }
}
