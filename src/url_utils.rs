//! URL normalization and crawl-scope helpers shared by the frontier, the store and the dedup engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl UrlError {
    fn invalid(url: &str, reason: impl Into<String>) -> Self {
        UrlError::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Drop the whole query string so `?page=2` variants collapse onto one key.
    pub ignore_get_params: bool,
}

/// A URL in canonical comparable form. Equality of two `NormalizedUrl`s is the
/// identity used by the frontier and the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    /// Rebuild a key that was produced by [`normalize`] earlier, e.g. one read back from the store.
    pub fn from_stored(key: &str) -> Result<Self, UrlError> {
        normalize(key, None, NormalizeOptions::default())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Host plus explicit port, used to key per-host politeness state.
    pub fn authority(&self) -> String {
        match self.0.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve `raw` against `base`, then canonicalize it.
///
/// Scheme and host are lowercased and default ports dropped by the `url`
/// parser itself; the fragment is always removed. The query string is kept
/// byte-for-byte unless `ignore_get_params` is set, so `?a=1&b=2` and
/// `?b=2&a=1` stay distinct keys.
pub fn normalize(
    raw: &str,
    base: Option<&Url>,
    options: NormalizeOptions,
) -> Result<NormalizedUrl, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::invalid(raw, "empty URL"));
    }

    let mut parsed = match base {
        Some(base) => base.join(trimmed),
        None => Url::parse(trimmed),
    }
    .map_err(|e| UrlError::invalid(raw, e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::invalid(
            raw,
            format!("scheme '{}' is not crawlable", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::invalid(raw, "missing host"));
    }

    parsed.set_fragment(None);
    if options.ignore_get_params {
        parsed.set_query(None);
    }

    Ok(NormalizedUrl(parsed))
}

/// The part of the web a crawl may touch: the seed's host, and below the
/// seed's directory when the seed carries a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainScope {
    authority: String,
    path_prefix: String,
}

impl DomainScope {
    pub fn from_seed(seed: &NormalizedUrl) -> Self {
        Self {
            authority: seed.authority(),
            path_prefix: Self::directory_of(seed.path()),
        }
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        if url.authority() != self.authority {
            return false;
        }
        let path = url.path();
        if path.starts_with(&self.path_prefix) {
            return true;
        }
        // `/docs` is inside the `/docs/` scope.
        self.path_prefix
            .strip_suffix('/')
            .is_some_and(|bare| bare == path)
    }

    /// `/docs` and `/docs/` both scope to `/docs/`; `/docs/intro.html` scopes to `/docs/`.
    fn directory_of(path: &str) -> String {
        if path.is_empty() || path == "/" {
            return "/".to_string();
        }
        if path.ends_with('/') {
            return path.to_string();
        }
        let (parent, last) = path.rsplit_once('/').unwrap_or(("", path));
        if last.contains('.') {
            format!("{}/", parent)
        } else {
            format!("{}/", path)
        }
    }
}

pub fn robots_url(url: &NormalizedUrl) -> Url {
    let mut robots = url.as_url().clone();
    robots.set_query(None);
    robots.set_path("/robots.txt");
    robots
}

/// Skip binaries and assets; a documentation mirror only wants pages.
pub fn is_crawlable_resource(url: &NormalizedUrl) -> bool {
    let path = url.path().to_ascii_lowercase();
    const DISALLOWED_EXTENSIONS: &[&str] = &[
        ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".css", ".js",
        ".json", ".xml", ".zip", ".mp4", ".avi", ".mov", ".mp3", ".wav", ".woff", ".woff2",
        ".ttf", ".tar", ".gz", ".tgz", ".bz2", ".7z", ".rar", ".exe", ".msi", ".dmg", ".iso",
    ];
    if DISALLOWED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    match url.as_url().query() {
        Some(query) => {
            let query = query.to_ascii_lowercase();
            !(query.contains("download") || query.contains("attachment"))
        }
        None => true,
    }
}

/// Add `https://` to bare domains typed on the command line.
pub fn normalize_url_for_cli(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize(raw, None, NormalizeOptions::default())
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn test_lowercases_scheme_and_host_and_strips_default_port() {
        assert_eq!(norm("HTTPS://Docs.Example.COM:443/Guide"), "https://docs.example.com/Guide");
        assert_eq!(norm("http://example.com:80/a"), "http://example.com/a");
        assert_eq!(norm("http://example.com:8080/a"), "http://example.com:8080/a");
    }

    #[test]
    fn test_always_strips_fragment() {
        assert_eq!(norm("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_query_kept_verbatim_and_order_sensitive() {
        let a = norm("https://example.com/p?a=1&b=2");
        let b = norm("https://example.com/p?b=2&a=1");
        assert_eq!(a, "https://example.com/p?a=1&b=2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_ignore_get_params_strips_query() {
        let options = NormalizeOptions {
            ignore_get_params: true,
        };
        let a = normalize("https://example.com/p?a=1&b=2", None, options).unwrap();
        let b = normalize("https://example.com/p?b=2", None, options).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://example.com/p");
    }

    #[test]
    fn test_resolves_relative_against_base() {
        let base = Url::parse("https://example.com/docs/guide/").unwrap();
        let options = NormalizeOptions::default();
        assert_eq!(
            normalize("../api#x", Some(&base), options).unwrap().as_str(),
            "https://example.com/docs/api"
        );
        assert_eq!(
            normalize("/top", Some(&base), options).unwrap().as_str(),
            "https://example.com/top"
        );
    }

    #[test]
    fn test_rejects_unparseable_and_disallowed_schemes() {
        let options = NormalizeOptions::default();
        assert!(matches!(
            normalize("not a url", None, options),
            Err(UrlError::InvalidUrl { .. })
        ));
        assert!(normalize("ftp://example.com/file", None, options).is_err());
        assert!(normalize("mailto:someone@example.com", None, options).is_err());
        assert!(normalize("", None, options).is_err());
    }

    #[test]
    fn test_from_stored_round_trips_key() {
        let url = normalize("https://example.com/a?x=1", None, NormalizeOptions::default()).unwrap();
        assert_eq!(NormalizedUrl::from_stored(url.as_str()).unwrap(), url);
    }

    #[test]
    fn test_scope_restricts_host_and_prefix() {
        let seed = NormalizedUrl::from_stored("https://ex.com/docs").unwrap();
        let scope = DomainScope::from_seed(&seed);
        assert_eq!(scope.path_prefix(), "/docs/");

        let inside = |u: &str| scope.contains(&NormalizedUrl::from_stored(u).unwrap());
        assert!(inside("https://ex.com/docs"));
        assert!(inside("https://ex.com/docs/"));
        assert!(inside("https://ex.com/docs/b"));
        assert!(!inside("https://ex.com/docsearch"));
        assert!(!inside("https://ex.com/blog"));
        assert!(!inside("https://other.com/docs/b"));
        assert!(!inside("https://ex.com:8443/docs/b"));
    }

    #[test]
    fn test_scope_from_file_seed_uses_parent_directory() {
        let seed = NormalizedUrl::from_stored("https://ex.com/guide/intro.html").unwrap();
        let scope = DomainScope::from_seed(&seed);
        assert_eq!(scope.path_prefix(), "/guide/");

        let root = NormalizedUrl::from_stored("https://ex.com/").unwrap();
        assert_eq!(DomainScope::from_seed(&root).path_prefix(), "/");
    }

    #[test]
    fn test_robots_url() {
        let url = NormalizedUrl::from_stored("https://example.com/some/path?q=1").unwrap();
        assert_eq!(
            robots_url(&url).as_str(),
            "https://example.com/robots.txt"
        );
    }

    #[test]
    fn test_is_crawlable_resource() {
        let check = |u: &str| is_crawlable_resource(&NormalizedUrl::from_stored(u).unwrap());
        assert!(check("https://test.local/page"));
        assert!(check("https://test.local/page.html"));
        assert!(!check("https://test.local/file.pdf"));
        assert!(!check("https://test.local/image.JPG"));
        assert!(!check("https://test.local/get?download=1"));
    }

    #[test]
    fn test_normalize_url_for_cli() {
        assert_eq!(normalize_url_for_cli("example.com"), "https://example.com");
        assert_eq!(normalize_url_for_cli("http://example.com"), "http://example.com");
    }
}
