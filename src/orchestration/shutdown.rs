//! Graceful shutdown handler.

use crate::crawler::CancelHandle;
use tracing::warn;

/// First Ctrl+C stops admitting new fetches and lets in-flight ones finish.
/// Second Ctrl+C exits immediately.
pub fn setup_shutdown_handler(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight fetches (press again to force quit)");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nForce quit requested, exiting immediately...");
                std::process::exit(130);
            }
        }
    });
}
