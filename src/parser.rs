use scraper::{ElementRef, Html, Node, Selector};

/// Elements whose text never reaches the reader.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Links and canonical declaration of one HTML document, parsed in a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    pub links: Vec<String>,
    pub canonical: Option<String>,
}

/// Parse `html_body` once and pull out everything the crawler needs from it.
pub fn parse_page(html_body: &str) -> ParsedPage {
    let document = Html::parse_document(html_body);
    ParsedPage {
        links: links_in(&document),
        canonical: canonical_in(&document),
    }
}

/// Extract all hyperlink targets from HTML content.
///
/// Returns the raw `href` of every `<a>` element, in document order, minus
/// empty values and non-navigable schemes (`javascript:`, `mailto:`, `tel:`,
/// `data:`, `file:`). Resolution against the page URL is left to the caller.
///
/// # Examples
/// ```
/// use docgrab::parser::extract_links;
///
/// let html = r#"<html><body><a href="/guide">Guide</a></body></html>"#;
/// assert_eq!(extract_links(html), vec!["/guide"]);
/// ```
pub fn extract_links(html_body: &str) -> Vec<String> {
    links_in(&Html::parse_document(html_body))
}

/// The raw `href` of the first `<link rel="canonical">`, if any.
pub fn extract_canonical(html_body: &str) -> Option<String> {
    canonical_in(&Html::parse_document(html_body))
}

/// Whether a raw href is worth resolving at all.
pub fn is_navigable_href(href: &str) -> bool {
    const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "file:"];
    let lowered = href.trim_start().to_ascii_lowercase();
    !lowered.is_empty() && !SKIPPED_SCHEMES.iter().any(|s| lowered.starts_with(s))
}

fn links_in(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| is_navigable_href(href))
        .map(str::to_string)
        .collect()
}

fn canonical_in(document: &Html) -> Option<String> {
    let selector = Selector::parse("link[rel][href]").ok()?;
    document
        .select(&selector)
        .filter(|element| {
            element.value().attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("canonical"))
            })
        })
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// Human-visible text of a document: markup, scripts, styles and templates
/// removed, runs of whitespace collapsed to one space.
pub fn visible_text(html_body: &str) -> String {
    let document = Html::parse_document(html_body);
    let mut words: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().filter_map(ElementRef::wrap).any(|el| {
            INVISIBLE_ELEMENTS
                .iter()
                .any(|name| el.value().name().eq_ignore_ascii_case(name))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}
