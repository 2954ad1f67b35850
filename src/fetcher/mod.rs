//! Page fetcher capability used by the crawl pipeline.
//!
//! The crawl core only sees these traits. Whether pages come from a headless
//! browser or a plain HTTP client plus HTML parser is decided by the
//! implementation handed to it; [`HttpFetcher`] is the one shipped here.
//!
//! Each logical page visit opens its own [`FetchScope`] and closes it when
//! done, so no cookies or history leak from one job to the next.

mod http;

#[cfg(test)]
pub mod fixture;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;

pub use http::HttpFetcher;
#[cfg(test)]
pub use http::HtmlPage;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Scope: FetchScope;

    /// Acquire a fresh, isolated scope for one page visit.
    async fn open_scope(&self) -> Result<Self::Scope, FetchError>;
}

#[async_trait]
pub trait FetchScope: Send + Sized {
    type Page: Page;

    async fn load(&mut self, url: &Url, timeout: Duration) -> Result<Self::Page, FetchError>;

    /// Release the scope. Callers invoke this on every exit path they control.
    ///
    /// A scope can also be dropped without `close`, e.g. when the crawl
    /// stream is dropped mid-fetch. Implementations must release the
    /// underlying session on drop as well.
    async fn close(self);
}

#[async_trait]
pub trait Page: Send + Sync {
    type Element: Element;

    fn url(&self) -> &Url;

    /// Elements matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<Self::Element>, FetchError>;
}

#[async_trait]
pub trait Element: Send + Sync + Sized {
    /// Descendants matching `selector`, in document order.
    async fn query(&self, selector: &str) -> Result<Vec<Self>, FetchError>;

    async fn text(&self, timeout: Duration) -> Result<String, FetchError>;

    fn attribute(&self, name: &str) -> Option<String>;

    async fn is_visible(&self) -> bool;
}
