//! Pluggable page fetchers.
//!
//! A backend turns a URL into a [`FetchedPage`]: status, raw HTML, the raw
//! hrefs it links to and its declared canonical. Two implementations ship:
//! [`simple::SimpleBackend`] parses with a full DOM, while
//! [`streaming::StreamingBackend`] runs a streaming rewriter over the body and
//! never builds a tree. The crawl loop only sees the trait.

pub mod simple;
pub mod streaming;

use crate::network::HttpClient;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub use crate::network::FetchError;

/// One fetched HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status_code: u16,
    /// Where the request ended up after redirects, when that differs from the requested URL.
    pub final_url: Option<Url>,
    pub raw_html: String,
    /// Raw `href` values in document order; resolution happens in the crawler.
    pub extracted_links: Vec<String>,
    pub canonical_url: Option<String>,
    pub encoding: String,
}

impl FetchedPage {
    /// Base for resolving relative links found on this page.
    pub fn base_url<'a>(&'a self, requested: &'a Url) -> &'a Url {
        self.final_url.as_ref().unwrap_or(requested)
    }
}

#[async_trait]
pub trait ScraperBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Full DOM parse of every page
    #[default]
    Simple,
    /// Streaming rewriter, lower memory on large pages
    Streaming,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Simple => f.write_str("simple"),
            BackendKind::Streaming => f.write_str("streaming"),
        }
    }
}

pub fn build_backend(kind: BackendKind, http: Arc<HttpClient>) -> Arc<dyn ScraperBackend> {
    match kind {
        BackendKind::Simple => Arc::new(simple::SimpleBackend::new(http)),
        BackendKind::Streaming => Arc::new(streaming::StreamingBackend::new(http)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_backend_by_kind() {
        let http = Arc::new(HttpClient::new("TestBot/1.0", Duration::from_secs(5)).unwrap());
        assert_eq!(build_backend(BackendKind::Simple, Arc::clone(&http)).name(), "simple");
        assert_eq!(build_backend(BackendKind::Streaming, http).name(), "streaming");
    }

    #[test]
    fn test_base_url_prefers_final_url() {
        let requested = Url::parse("https://ex.com/docs").unwrap();
        let mut page = FetchedPage {
            status_code: 200,
            final_url: None,
            raw_html: String::new(),
            extracted_links: Vec::new(),
            canonical_url: None,
            encoding: "utf-8".to_string(),
        };
        assert_eq!(page.base_url(&requested).as_str(), "https://ex.com/docs");

        page.final_url = Some(Url::parse("https://ex.com/docs/").unwrap());
        assert_eq!(page.base_url(&requested).as_str(), "https://ex.com/docs/");
    }
}
