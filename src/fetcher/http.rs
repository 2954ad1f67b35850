use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{Element, FetchScope, Page, PageFetcher};
use crate::error::FetchError;

/// Plain HTTP fetcher. Every scope gets its own client and cookie jar.
pub struct HttpFetcher {
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

pub struct HttpScope {
    client: reqwest::Client,
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    type Scope = HttpScope;

    async fn open_scope(&self) -> Result<HttpScope, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Scope(e.to_string()))?;
        Ok(HttpScope { client })
    }
}

#[async_trait]
impl FetchScope for HttpScope {
    type Page = HtmlPage;

    async fn load(&mut self, url: &Url, timeout: Duration) -> Result<HtmlPage, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Redirects may land elsewhere; relative links resolve against the final URL.
        let final_url = resp.url().clone();
        let html = resp
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(e, timeout))?;
        debug!(url = %final_url, bytes = html.len(), "Loaded page");
        Ok(HtmlPage::new(final_url, html))
    }

    async fn close(self) {
        drop(self.client);
    }
}

/// A fetched HTML document. Parsed on demand so the page stays `Send`.
#[derive(Debug, Clone)]
pub struct HtmlPage {
    url: Url,
    html: String,
}

impl HtmlPage {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }
}

#[async_trait]
impl Page for HtmlPage {
    type Element = HtmlElement;

    fn url(&self) -> &Url {
        &self.url
    }

    async fn query(&self, selector: &str) -> Result<Vec<HtmlElement>, FetchError> {
        select_document(&self.html, selector)
    }
}

/// Snapshot of one matched element.
#[derive(Debug, Clone)]
pub struct HtmlElement {
    outer_html: String,
    text: String,
    attrs: Vec<(String, String)>,
}

#[async_trait]
impl Element for HtmlElement {
    async fn query(&self, selector: &str) -> Result<Vec<HtmlElement>, FetchError> {
        select_descendants(&self.outer_html, selector)
    }

    async fn text(&self, _timeout: Duration) -> Result<String, FetchError> {
        Ok(self.text.clone())
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    async fn is_visible(&self) -> bool {
        !self.is_hidden()
    }
}

impl HtmlElement {
    fn is_hidden(&self) -> bool {
        let flag = |name: &str| {
            self.attribute(name)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
        };
        let display_none = self.attribute("style").is_some_and(|s| {
            s.to_ascii_lowercase()
                .replace(char::is_whitespace, "")
                .contains("display:none")
        });
        self.attribute("hidden").is_some() || flag("aria-hidden") || flag("aria-disabled") || display_none
    }
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|e| {
        debug!("Failed to parse selector '{}': {}", selector, e);
        FetchError::Selector(selector.to_string())
    })
}

fn snapshot(el: ElementRef<'_>) -> HtmlElement {
    HtmlElement {
        outer_html: el.html(),
        text: el.text().collect(),
        attrs: el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn select_document(html: &str, selector: &str) -> Result<Vec<HtmlElement>, FetchError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    Ok(doc.select(&sel).map(snapshot).collect())
}

fn select_descendants(fragment: &str, selector: &str) -> Result<Vec<HtmlElement>, FetchError> {
    let sel = parse_selector(selector)?;
    let doc = Html::parse_fragment(fragment);
    let root = doc.root_element();
    // The fragment parser wraps our element in <html>; search below the element itself.
    let own = root.children().find_map(ElementRef::wrap).unwrap_or(root);
    Ok(own.select(&sel).map(snapshot).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> HtmlPage {
        HtmlPage::new(Url::parse("https://uk.indeed.com/jobs").unwrap(), html)
    }

    #[tokio::test]
    async fn query_preserves_document_order() {
        let p = page(r#"<ul><li class="j">one</li><li class="j">two</li><li class="j">three</li></ul>"#);
        let els = p.query(".j").await.unwrap();
        let texts: Vec<String> = els.iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn nested_query_and_attributes() {
        let p = page(
            r#"<a class="jcs-JobTitle" href="/viewjob?jk=1"><span id="jobTitle-1">Rust Dev</span></a>"#,
        );
        let els = p.query(".jcs-JobTitle").await.unwrap();
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].attribute("href").as_deref(), Some("/viewjob?jk=1"));
        assert_eq!(els[0].attribute("missing"), None);

        let spans = els[0].query("span[id^='jobTitle']").await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text(Duration::from_secs(1)).await.unwrap(), "Rust Dev");

        // the element itself is not one of its own descendants
        let selfs = els[0].query(".jcs-JobTitle").await.unwrap();
        assert!(selfs.is_empty());
    }

    #[tokio::test]
    async fn invalid_selector_is_an_error() {
        let p = page("<p>hi</p>");
        assert!(matches!(p.query("[[[").await, Err(FetchError::Selector(_))));
    }

    #[tokio::test]
    async fn visibility_flags() {
        let p = page(
            r#"<a id="a" href="/x">shown</a>
               <a id="b" href="/x" hidden>hidden</a>
               <a id="c" href="/x" aria-disabled="true">disabled</a>
               <a id="d" href="/x" style="display: none">none</a>"#,
        );
        assert!(p.query("#a").await.unwrap()[0].is_visible().await);
        assert!(!p.query("#b").await.unwrap()[0].is_visible().await);
        assert!(!p.query("#c").await.unwrap()[0].is_visible().await);
        assert!(!p.query("#d").await.unwrap()[0].is_visible().await);
    }
}
