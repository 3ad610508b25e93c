//! Politeness: a concurrency cap plus a minimum spacing between dispatches.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("governor is closed")]
    Closed,
}

/// Hands out [`Lease`]s. At most `concurrent_requests` leases are alive at
/// once, and two consecutive admissions are at least `min_delay` apart.
/// Waiters are admitted in FIFO order.
#[derive(Debug)]
pub struct Governor {
    permits: Arc<Semaphore>,
    capacity: usize,
    min_delay_ms: AtomicU64,
    last_dispatch: Mutex<Option<Instant>>,
    outstanding: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

/// Proof of admission. Dropping it releases the concurrency slot.
#[derive(Debug)]
pub struct Lease {
    _permit: OwnedSemaphorePermit,
    outstanding: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Governor {
    pub fn new(concurrent_requests: usize, min_delay: Duration) -> Self {
        let capacity = concurrent_requests.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            min_delay_ms: AtomicU64::new(min_delay.as_millis() as u64),
            last_dispatch: Mutex::new(None),
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms.load(Ordering::Relaxed))
    }

    /// Widen the spacing, e.g. to honour a robots.txt `Crawl-delay`. Never shrinks it.
    pub fn raise_min_delay(&self, delay: Duration) {
        let previous = self
            .min_delay_ms
            .fetch_max(delay.as_millis() as u64, Ordering::Relaxed);
        if (delay.as_millis() as u64) > previous {
            tracing::info!("Dispatch spacing raised to {:?}", delay);
        }
    }

    /// Wait for a slot and for the spacing window, then admit.
    ///
    /// Cancel-safe: dropping the future before it resolves consumes nothing.
    pub async fn admit(&self) -> Result<Lease, GovernorError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| GovernorError::Closed)?;

        {
            let mut last = self.last_dispatch.lock().await;
            if let Some(previous) = *last {
                tokio::time::sleep_until(previous + self.min_delay()).await;
            }
            *last = Some(Instant::now());
        }

        let current = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        Ok(Lease {
            _permit: permit,
            outstanding: Arc::clone(&self.outstanding),
        })
    }

    /// Stop admitting. Every current and future waiter gets
    /// [`GovernorError::Closed`]; leases already handed out stay valid.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously outstanding leases seen so far.
    pub fn peak_outstanding(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
