// Global configuration constants - single source of truth

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendKind;

pub struct Config;

impl Config {
    // Crawl limits
    pub const DEFAULT_MAX_DEPTH: u32 = 5;
    pub const DEFAULT_MAX_PAGES: usize = 1000;
    pub const DEFAULT_CONCURRENT_REQUESTS: usize = 4;
    pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
    pub const DEFAULT_RETRY_LIMIT: u32 = 3;

    // HTTP/Network config
    pub const DEFAULT_USER_AGENT: &'static str =
        concat!("docgrab/", env!("CARGO_PKG_VERSION"), " (+offline documentation mirror)");
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024; // 10MB
    pub const RETRY_BACKOFF_BASE_MS: u64 = 500;
    pub const RETRY_BACKOFF_MAX_MS: u64 = 30_000;

    // Output layout
    pub const DEFAULT_OUTPUT_DIR: &'static str = "./docgrab-output";
    pub const LOG_DIR: &'static str = "logs";
    pub const MANIFEST_FILE: &'static str = "manifest.jsonl";

    // Progress reporting
    pub const PROGRESS_INTERVAL: u64 = 25;
    pub const PROGRESS_TIME_SECS: u64 = 30;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("seed URL must not be empty")]
    MissingSeed,

    #[error("concurrent_requests must be at least 1")]
    ZeroConcurrency,

    #[error("max_pages must be at least 1")]
    ZeroMaxPages,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("user agent must not be empty")]
    EmptyUserAgent,
}

/// Everything one crawl run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlConfig {
    pub seed_url: String,
    pub output_dir: PathBuf,
    pub max_depth: u32,
    pub max_pages: usize,
    pub request_delay: Duration,
    pub concurrent_requests: usize,
    pub ignore_get_params: bool,
    pub ignore_canonical: bool,
    pub ignore_duplicates: bool,
    pub retry_limit: u32,
    pub user_agent: String,
    pub timeout: Duration,
    pub backend: BackendKind,
    pub save_pages: bool,
}

impl CrawlConfig {
    pub fn new(seed_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed_url: seed_url.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_url.trim().is_empty() {
            return Err(ConfigError::MissingSeed);
        }
        if self.concurrent_requests == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_pages == 0 {
            return Err(ConfigError::ZeroMaxPages);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join(Config::LOG_DIR)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            output_dir: PathBuf::from(Config::DEFAULT_OUTPUT_DIR),
            max_depth: Config::DEFAULT_MAX_DEPTH,
            max_pages: Config::DEFAULT_MAX_PAGES,
            request_delay: Duration::from_millis(Config::DEFAULT_REQUEST_DELAY_MS),
            concurrent_requests: Config::DEFAULT_CONCURRENT_REQUESTS,
            ignore_get_params: false,
            ignore_canonical: false,
            ignore_duplicates: false,
            retry_limit: Config::DEFAULT_RETRY_LIMIT,
            user_agent: Config::DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(Config::DEFAULT_TIMEOUT_SECS),
            backend: BackendKind::Simple,
            save_pages: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrawlConfig::new("https://ex.com/docs", "/tmp/out");
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_pages, 1000);
        assert_eq!(config.request_delay, Duration::from_secs(1));
        assert_eq!(config.concurrent_requests, 4);
        assert_eq!(config.retry_limit, 3);
        assert!(!config.ignore_get_params);
        assert!(!config.ignore_canonical);
        assert!(!config.ignore_duplicates);
        assert!(config.save_pages);
        assert_eq!(config.backend, BackendKind::Simple);
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/out/logs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let base = CrawlConfig::new("https://ex.com/", "/tmp/out");

        assert_eq!(
            CrawlConfig { seed_url: " ".into(), ..base.clone() }.validate(),
            Err(ConfigError::MissingSeed)
        );
        assert_eq!(
            CrawlConfig { concurrent_requests: 0, ..base.clone() }.validate(),
            Err(ConfigError::ZeroConcurrency)
        );
        assert_eq!(
            CrawlConfig { max_pages: 0, ..base.clone() }.validate(),
            Err(ConfigError::ZeroMaxPages)
        );
        assert_eq!(
            CrawlConfig { timeout: Duration::ZERO, ..base.clone() }.validate(),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            CrawlConfig { user_agent: String::new(), ..base }.validate(),
            Err(ConfigError::EmptyUserAgent)
        );
    }
}
