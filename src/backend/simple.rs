use super::{FetchError, FetchedPage, ScraperBackend};
use crate::network::HttpClient;
use crate::parser;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// Fetches over HTTP and parses the whole document with `scraper`.
pub struct SimpleBackend {
    http: Arc<HttpClient>,
}

impl SimpleBackend {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ScraperBackend for SimpleBackend {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self.http.get_html(url).await?;
        let raw_html = response.text();
        let parsed = parser::parse_page(&raw_html);

        Ok(FetchedPage {
            status_code: response.status_code,
            final_url: (response.final_url != *url).then(|| response.final_url.clone()),
            encoding: response.charset(),
            raw_html,
            extracted_links: parsed.links,
            canonical_url: parsed.canonical,
        })
    }
}
