use std::collections::HashSet;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::dedup::{dedup_key, DedupGate};
use super::detail::DetailFetcher;
use super::listing::{resolve_link, ListingExtractor};
use super::pacing::Pacer;
use super::{load_with_deadline, JobRecord, JobStub};
use crate::config::Settings;
use crate::error::CrawlError;
use crate::fetcher::{Element, FetchScope, Page, PageFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Fetching,
    Extracting,
    PerItemProcessing,
    AdvancingCursor,
    Done,
    Failed,
}

/// Where the walk goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    At(Url),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    Done,
    /// A listing page could not be fetched.
    Failed(String),
}

impl WalkOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            WalkOutcome::Done => "done",
            WalkOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub enum WalkEvent {
    PageLoaded { url: Url, stubs: usize },
    Duplicate { url: Url },
    Record(JobRecord),
    /// Always the last event.
    Finished(WalkOutcome),
}

struct ListingVisit {
    stubs: Vec<JobStub>,
    next: PageCursor,
}

/// Walks listing pages through their "next" links, one job at a time.
pub struct PaginationWalker<'a, F> {
    fetcher: &'a F,
    listing: ListingExtractor<'a>,
    detail: DetailFetcher<'a, F>,
    pacer: Pacer,
    next_selector: &'a str,
    base: Url,
    page_timeout: Duration,
    field_timeout: Duration,
    max_pages: Option<usize>,
}

fn enter(state: &mut WalkState, next: WalkState) {
    debug!(from = ?state, to = ?next, "Walker state");
    *state = next;
}

impl<'a, F: PageFetcher + 'a> PaginationWalker<'a, F> {
    pub fn new(fetcher: &'a F, settings: &'a Settings) -> Result<Self, CrawlError> {
        let base = settings.base()?;
        let timeouts = settings.timeouts();
        Ok(Self {
            fetcher,
            listing: ListingExtractor::new(&settings.selectors, base.clone(), timeouts.field),
            detail: DetailFetcher::new(
                fetcher,
                &settings.selectors,
                timeouts,
                settings.retry_policy(),
            ),
            pacer: settings.pacer(),
            next_selector: &settings.selectors.next_page,
            base,
            page_timeout: timeouts.page,
            field_timeout: timeouts.field,
            max_pages: settings.max_pages,
        })
    }

    /// Lazily walk from `start`, yielding one event per page, skipped duplicate
    /// and finished record, then a final [`WalkEvent::Finished`].
    ///
    /// Nothing is fetched until the stream is polled, and the walk pauses
    /// whenever the consumer does.
    pub fn walk(&'a self, start: Url, gate: &'a mut DedupGate) -> impl Stream<Item = WalkEvent> + 'a {
        stream! {
            let mut state = WalkState::Fetching;
            let mut cursor = PageCursor::At(start);
            let mut visited: HashSet<Url> = HashSet::new();

            while let PageCursor::At(url) = cursor {
                if self.max_pages.is_some_and(|max| visited.len() >= max) {
                    info!("Reached page limit ({}), stopping", visited.len());
                    break;
                }
                visited.insert(url.clone());

                enter(&mut state, WalkState::Fetching);
                info!("Scraping page: {}", url);
                let visit = match self.visit_listing(&url, &mut state).await {
                    Ok(visit) => visit,
                    Err(e) => {
                        error!("{}", e);
                        enter(&mut state, WalkState::Failed);
                        yield WalkEvent::Finished(WalkOutcome::Failed(e.to_string()));
                        return;
                    }
                };
                yield WalkEvent::PageLoaded { url: url.clone(), stubs: visit.stubs.len() };

                enter(&mut state, WalkState::PerItemProcessing);
                for stub in visit.stubs {
                    let key = dedup_key(&stub.detail_url);
                    if !gate.admit(&key) {
                        debug!("Skipping duplicate {}", key);
                        yield WalkEvent::Duplicate { url: stub.detail_url };
                        continue;
                    }

                    info!("Fetching details for URL: {}", stub.detail_url);
                    let details = self.detail.fetch(&stub.detail_url).await;
                    yield WalkEvent::Record(JobRecord::from_details(&stub, details));
                    self.pacer.pause().await;
                }

                enter(&mut state, WalkState::AdvancingCursor);
                cursor = match visit.next {
                    PageCursor::At(next) if visited.contains(&next) => {
                        warn!("Next page {} was already visited, stopping", next);
                        PageCursor::End
                    }
                    other => other,
                };
            }

            enter(&mut state, WalkState::Done);
            yield WalkEvent::Finished(WalkOutcome::Done);
        }
    }

    /// Load one listing page in its own scope, pull its stubs and the next
    /// link, then release the scope before any detail page is visited.
    #[instrument(skip_all, fields(url = %url))]
    async fn visit_listing(&self, url: &Url, state: &mut WalkState) -> Result<ListingVisit, CrawlError> {
        let listing_error = |source| CrawlError::ListingFetch {
            url: url.to_string(),
            source,
        };
        let mut scope = self.fetcher.open_scope().await.map_err(listing_error)?;
        let result = match load_with_deadline(&mut scope, url, self.page_timeout).await {
            Ok(page) => {
                enter(state, WalkState::Extracting);
                let stubs = self.listing.extract(&page).await;
                info!("Found {} job elements.", stubs.len());
                let next = self.next_page(&page).await;
                Ok(ListingVisit { stubs, next })
            }
            Err(source) => Err(listing_error(source)),
        };
        scope.close().await;
        result
    }

    /// Resolve the "next page" link. Any problem ends pagination.
    async fn next_page<P: Page>(&self, page: &P) -> PageCursor {
        let lookup = async {
            let links = match page.query(self.next_selector).await {
                Ok(links) => links,
                Err(e) => {
                    error!("Error finding next page link: {}", e);
                    return PageCursor::End;
                }
            };
            let Some(link) = links.into_iter().next() else {
                info!("No next page link, this was the last page");
                return PageCursor::End;
            };
            if !link.is_visible().await {
                info!("Next page link is hidden, this was the last page");
                return PageCursor::End;
            }
            let Some(href) = link.attribute("href") else {
                warn!("Next page link has no href");
                return PageCursor::End;
            };
            match resolve_link(&self.base, &href) {
                Some(next) => PageCursor::At(next),
                None => {
                    error!("Could not resolve next page link '{}'", href);
                    PageCursor::End
                }
            }
        };
        match tokio::time::timeout(self.field_timeout, lookup).await {
            Ok(cursor) => cursor,
            Err(_) => {
                error!("Timed out looking for the next page link");
                PageCursor::End
            }
        }
    }
}
