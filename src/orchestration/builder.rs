//! Main crawler builder function.

use std::sync::Arc;

use crate::backend::build_backend;
use crate::config::{Config, CrawlConfig};
use crate::crawler::{CrawlError, Crawler};
use crate::network::HttpClient;
use crate::page_writer::PageWriter;
use crate::robots::HostRobotsCache;
use crate::state::CrawlStore;

/// Builds a complete crawler with all components wired up: the store under
/// `output_dir`, one shared HTTP client for the backend and robots.txt, and
/// the page writer when pages are being saved.
#[tracing::instrument(skip(config), fields(seed = %config.seed_url, backend = %config.backend))]
pub fn build_crawler(config: CrawlConfig) -> Result<Crawler, CrawlError> {
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)?;

    let store = Arc::new(CrawlStore::open(&config.output_dir)?);
    let http = Arc::new(HttpClient::with_content_limit(
        &config.user_agent,
        config.timeout,
        Config::MAX_CONTENT_SIZE,
    )?);
    let backend = build_backend(config.backend, Arc::clone(&http));
    let robots = Arc::new(HostRobotsCache::new(http));

    let pages = config
        .save_pages
        .then(|| PageWriter::new(config.output_dir.join(PageWriter::DIR_NAME)));

    let crawler = Crawler::new(config, store, backend, robots)?;
    Ok(match pages {
        Some(pages) => crawler.with_page_writer(pages),
        None => crawler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_crawler_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("mirror");
        let crawler = build_crawler(CrawlConfig::new("https://ex.com/docs", &out)).unwrap();

        assert!(out.join(crate::state::CrawlStore::FILE_NAME).exists());
        assert_eq!(crawler.seed().as_str(), "https://ex.com/docs");
        assert_eq!(crawler.scope().path_prefix(), "/docs/");
    }

    #[test]
    fn test_build_crawler_rejects_bad_seed() {
        let dir = TempDir::new().unwrap();
        let result = build_crawler(CrawlConfig::new("ftp://ex.com/", dir.path()));
        assert!(matches!(result, Err(CrawlError::InvalidUrl(_))));
    }
}
