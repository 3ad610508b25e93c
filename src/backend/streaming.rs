use super::{FetchError, FetchedPage, ScraperBackend};
use crate::network::HttpClient;
use crate::parser::is_navigable_href;
use async_trait::async_trait;
use lol_html::{element, HtmlRewriter, Settings};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Fetches over HTTP and pulls links and the canonical out with a `lol_html`
/// rewriter instead of a DOM.
pub struct StreamingBackend {
    http: Arc<HttpClient>,
}

impl StreamingBackend {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[derive(Debug, Default)]
struct Extracted {
    links: Vec<String>,
    canonical: Option<String>,
}

/// Run the rewriter over an already-buffered body. `HtmlRewriter` is not
/// `Send`, so it must never live across an await point.
fn extract(body: &[u8]) -> Result<Extracted, String> {
    let found = Arc::new(Mutex::new(Extracted::default()));
    let links = Arc::clone(&found);
    let canonical = Arc::clone(&found);

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("a[href]", move |el| {
                    if let Some(href) = el.get_attribute("href") {
                        let href = href.trim();
                        if is_navigable_href(href) {
                            links.lock().links.push(href.to_string());
                        }
                    }
                    Ok(())
                }),
                element!("link[rel][href]", move |el| {
                    let is_canonical = el.get_attribute("rel").is_some_and(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|token| token.eq_ignore_ascii_case("canonical"))
                    });
                    if is_canonical && let Some(href) = el.get_attribute("href") {
                        let href = href.trim().to_string();
                        let mut found = canonical.lock();
                        if found.canonical.is_none() && !href.is_empty() {
                            found.canonical = Some(href);
                        }
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    rewriter.write(body).map_err(|e| e.to_string())?;
    rewriter.end().map_err(|e| e.to_string())?;

    let extracted = std::mem::take(&mut *found.lock());
    Ok(extracted)
}

#[async_trait]
impl ScraperBackend for StreamingBackend {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self.http.get_html(url).await?;

        let extracted = extract(&response.body).map_err(|e| {
            debug!("HTML parsing error for {}: {}", url, e);
            FetchError::permanent(Some(response.status_code), format!("unparseable HTML: {}", e))
        })?;

        Ok(FetchedPage {
            status_code: response.status_code,
            final_url: (response.final_url != *url).then(|| response.final_url.clone()),
            encoding: response.charset(),
            raw_html: response.text(),
            extracted_links: extracted.links,
            canonical_url: extracted.canonical,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    #[test]
    fn test_extract_links_and_canonical() {
        let html = br#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="canonical" href="https://ex.com/docs/">
            </head><body>
            <a href="/docs/a">A</a>
            <a href="javascript:void(0)">js</a>
            <a href=" b.html ">B</a>
            </body></html>"#;

        let extracted = extract(html).unwrap();
        assert_eq!(extracted.links, vec!["/docs/a", "b.html"]);
        assert_eq!(extracted.canonical.as_deref(), Some("https://ex.com/docs/"));
    }

    #[test]
    fn test_agrees_with_dom_parser() {
        let html = r#"<html><head><link rel="alternate canonical" href="/x"></head>
            <body><a href="/1">1</a><div><a href="2">2</a><a href="mailto:a@b">m</a></div></body></html>"#;

        let streamed = extract(html.as_bytes()).unwrap();
        let parsed = parser::parse_page(html);
        assert_eq!(streamed.links, parsed.links);
        assert_eq!(streamed.canonical, parsed.canonical);
    }

    #[test]
    fn test_empty_body() {
        let extracted = extract(b"").unwrap();
        assert!(extracted.links.is_empty());
        assert!(extracted.canonical.is_none());
    }
}
