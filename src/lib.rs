pub mod backend;
pub mod backoff;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod export;
pub mod frontier;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod orchestration;
pub mod page_writer;
pub mod parser;
pub mod robots;
pub mod state;
pub mod url_utils;

// Re-export main types for library usage
pub use backend::{BackendKind, FetchedPage, ScraperBackend};
pub use config::{Config, ConfigError, CrawlConfig};
pub use crawler::{CancelHandle, CrawlError, Crawler};
pub use dedup::{DedupEngine, DedupOptions, DedupVerdict};
pub use metrics::CrawlReport;
pub use network::{FetchError, HttpClient};
pub use orchestration::{Governor, build_crawler};
pub use parser::extract_links;
pub use robots::{HostRobotsCache, RobotsPolicy, RobotsTxt};
pub use state::{CrawlStore, Outcome, PageRecord, PageStatus, StoreError};
pub use url_utils::{DomainScope, NormalizeOptions, NormalizedUrl, UrlError, normalize};
