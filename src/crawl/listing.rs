use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, error, warn};
use url::Url;

use super::{normalize_text, JobStub, UNKNOWN};
use crate::config::Selectors;
use crate::error::FetchError;
use crate::fetcher::{Element, Page};

/// Turns one listing page into job stubs, in document order.
pub struct ListingExtractor<'a> {
    selectors: &'a Selectors,
    base: Url,
    field_timeout: Duration,
}

impl<'a> ListingExtractor<'a> {
    pub fn new(selectors: &'a Selectors, base: Url, field_timeout: Duration) -> Self {
        Self {
            selectors,
            base,
            field_timeout,
        }
    }

    /// Entries without a usable link are dropped with a warning, as are
    /// repeats of a URL already seen on this page.
    pub async fn extract<P: Page>(&self, page: &P) -> Vec<JobStub> {
        let elements = match page.query(&self.selectors.listing_item).await {
            Ok(els) => els,
            Err(e) => {
                error!("Could not query job entries on {}: {}", page.url(), e);
                return Vec::new();
            }
        };
        debug!("Found {} job elements on {}", elements.len(), page.url());

        let mut stubs = Vec::with_capacity(elements.len());
        let mut on_page = HashSet::new();

        for (i, element) in elements.iter().enumerate() {
            let Some(href) = element.attribute("href") else {
                warn!("Job entry {} on {} has no link, skipping", i + 1, page.url());
                continue;
            };
            let Some(detail_url) = resolve_link(&self.base, &href) else {
                warn!(
                    "Job entry {} on {} has unusable link '{}', skipping",
                    i + 1,
                    page.url(),
                    href
                );
                continue;
            };
            if !on_page.insert(detail_url.clone()) {
                debug!("Repeated entry {} on {}", detail_url, page.url());
                continue;
            }

            let list_title = self.title_of(element).await;
            stubs.push(JobStub {
                list_title,
                detail_url,
            });
        }
        stubs
    }

    async fn title_of<E: Element>(&self, element: &E) -> String {
        let lookup = async {
            let span = element
                .query(&self.selectors.listing_title)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| FetchError::NoMatch(self.selectors.listing_title.clone()))?;
            let text = span.text(self.field_timeout).await?;
            Ok::<String, FetchError>(text)
        };
        match tokio::time::timeout(self.field_timeout, lookup).await {
            Ok(Ok(text)) => normalize_text(&text),
            Ok(Err(e)) => {
                debug!("No listing title: {}", e);
                UNKNOWN.to_string()
            }
            Err(_) => UNKNOWN.to_string(),
        }
    }
}

/// Resolve an href against the site base. Only http(s) targets are usable.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
