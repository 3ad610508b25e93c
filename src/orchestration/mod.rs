//! High-level orchestration for crawl setup and execution.

pub mod builder;
pub mod governor;
pub mod shutdown;

pub use builder::build_crawler;
pub use governor::{Governor, GovernorError, Lease};
pub use shutdown::setup_shutdown_handler;
