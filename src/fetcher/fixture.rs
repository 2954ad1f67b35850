//! In-memory fetcher for tests: serves canned HTML, injects failures, and
//! records every load so tests can assert on retry counts and timing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use super::{FetchScope, HtmlPage, PageFetcher};
use crate::error::FetchError;

#[derive(Clone)]
enum Behavior {
    Html(String),
    Fail,
    Hang,
}

#[derive(Default)]
struct Inner {
    pages: Mutex<HashMap<String, Behavior>>,
    loads: Mutex<Vec<(String, Instant)>>,
    open: AtomicUsize,
    opened: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FixtureFetcher {
    inner: Arc<Inner>,
}

/// Read `tests/fixtures/<name>.html`.
pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(self, url: &str, behavior: Behavior) -> Self {
        self.inner
            .pages
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
        self
    }

    pub fn page(self, url: &str, html: impl Into<String>) -> Self {
        self.set(url, Behavior::Html(html.into()))
    }

    /// Every load of `url` errors immediately.
    pub fn failing(self, url: &str) -> Self {
        self.set(url, Behavior::Fail)
    }

    /// Every load of `url` never completes; only a caller deadline ends it.
    pub fn hanging(self, url: &str) -> Self {
        self.set(url, Behavior::Hang)
    }

    pub fn load_count(&self, url: &str) -> usize {
        self.loads_of(url).len()
    }

    pub fn loads_of(&self, url: &str) -> Vec<Instant> {
        self.inner
            .loads
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn total_loads(&self) -> usize {
        self.inner.loads.lock().unwrap().len()
    }

    /// Scopes opened but not yet closed.
    pub fn open_scopes(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn scopes_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }
}

pub struct FixtureScope {
    inner: Arc<Inner>,
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    type Scope = FixtureScope;

    async fn open_scope(&self) -> Result<FixtureScope, FetchError> {
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FixtureScope {
            inner: Arc::clone(&self.inner),
        })
    }
}

#[async_trait]
impl FetchScope for FixtureScope {
    type Page = HtmlPage;

    async fn load(&mut self, url: &Url, timeout: Duration) -> Result<HtmlPage, FetchError> {
        self.inner
            .loads
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let behavior = self.inner.pages.lock().unwrap().get(url.as_str()).cloned();
        match behavior {
            Some(Behavior::Html(html)) => Ok(HtmlPage::new(url.clone(), html)),
            Some(Behavior::Fail) => Err(FetchError::Timeout(timeout)),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            }),
        }
    }

    async fn close(self) {
        drop(self);
    }
}

impl Drop for FixtureScope {
    fn drop(&mut self) {
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
    }
}
