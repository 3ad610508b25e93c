use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{FetchedPage, ScraperBackend};
use crate::backoff::ExponentialBackoff;
use crate::config::{Config, ConfigError, CrawlConfig};
use crate::dedup::{DedupEngine, DedupOptions};
use crate::export::{self, ExportError};
use crate::frontier::{CrawlTarget, Frontier};
use crate::metrics::{CrawlMetrics, CrawlReport};
use crate::orchestration::governor::Governor;
use crate::page_writer::PageWriter;
use crate::robots::RobotsPolicy;
use crate::state::{CrawlStore, Outcome, PageRecord, PageStatus, StoreError};
use crate::url_utils::{
    self, DomainScope, NormalizeOptions, NormalizedUrl, UrlError,
};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid seed URL: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("cannot write manifest: {0}")]
    Export(#[from] ExportError),

    #[error("cannot build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Stops a running crawl. In-flight fetches finish and are recorded; queued
/// work is left for the next run.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Resolves once cancellation is requested; never resolves if it cannot be.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Store writes commit with an fsync, so they run on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, CrawlError>
where
    F: FnOnce() -> Result<T, CrawlError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Result of one spawned fetch task.
enum TaskOutcome {
    Finished {
        target: CrawlTarget,
        record: PageRecord,
        links: Vec<NormalizedUrl>,
    },
    /// Cancelled before any attempt; the reservation was dropped.
    Released { target: CrawlTarget },
    /// Cancelled after transient failures; the record stays `pending` with
    /// its retry count for the next session.
    Deferred { target: CrawlTarget, retries: u32 },
}

/// The part of the crawler each fetch task carries with it.
#[derive(Clone)]
struct Fetcher {
    store: Arc<CrawlStore>,
    backend: Arc<dyn ScraperBackend>,
    governor: Arc<Governor>,
    dedup: Arc<DedupEngine>,
    pages: Option<Arc<PageWriter>>,
    metrics: Arc<CrawlMetrics>,
    backoff: ExponentialBackoff,
    retry_limit: u32,
    normalize: NormalizeOptions,
    scope: DomainScope,
}

impl Fetcher {
    async fn run(
        self,
        target: CrawlTarget,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TaskOutcome, CrawlError> {
        let mut attempt = target.retries;

        loop {
            let lease = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return self.stand_down(target, attempt).await,
                lease = self.governor.admit() => match lease {
                    Ok(lease) => lease,
                    Err(_) => return self.stand_down(target, attempt).await,
                },
            };

            self.metrics.dispatched.inc();
            let started = Instant::now();
            let result = self.backend.fetch(target.url.as_url()).await;
            self.metrics.observe_fetch(started.elapsed());
            drop(lease);

            match result {
                Ok(page) => {
                    let fetcher = self.clone();
                    return blocking(move || fetcher.settle_page(target, page)).await;
                }
                Err(e) if e.is_retryable() && attempt < self.retry_limit => {
                    attempt += 1;
                    let store = Arc::clone(&self.store);
                    let key = target.url.as_str().to_string();
                    let message = e.to_string();
                    blocking(move || Ok(store.record_retry(&key, &message)?)).await?;
                    self.metrics.retries.inc();
                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        target.url, e, attempt, self.retry_limit, delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => return self.stand_down(target, attempt).await,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let store = Arc::clone(&self.store);
                    let key = target.url.as_str().to_string();
                    let outcome = Outcome::Error {
                        http_status_code: e.status_code(),
                        message: e.to_string(),
                    };
                    let record = blocking(move || Ok(store.commit(&key, outcome)?)).await?;
                    return Ok(TaskOutcome::Finished {
                        target,
                        record,
                        links: Vec::new(),
                    });
                }
            }
        }
    }

    /// Give up on `target` for this session. A URL with no failed attempts
    /// loses its reservation; one with retries on record keeps it pending so
    /// the count carries over.
    async fn stand_down(
        &self,
        target: CrawlTarget,
        attempt: u32,
    ) -> Result<TaskOutcome, CrawlError> {
        if attempt > 0 {
            return Ok(TaskOutcome::Deferred {
                target,
                retries: attempt,
            });
        }
        let store = Arc::clone(&self.store);
        let key = target.url.as_str().to_string();
        blocking(move || Ok(store.release(&key)?)).await?;
        Ok(TaskOutcome::Released { target })
    }

    fn settle_page(
        &self,
        target: CrawlTarget,
        page: FetchedPage,
    ) -> Result<TaskOutcome, CrawlError> {
        if let Some(final_url) = self.out_of_scope_redirect(&page) {
            let record = self.store.commit(
                target.url.as_str(),
                Outcome::RedirectedOutOfScope {
                    http_status_code: page.status_code,
                    final_url,
                },
            )?;
            return Ok(TaskOutcome::Finished {
                target,
                record,
                links: Vec::new(),
            });
        }

        let verdict = self.dedup.evaluate(&target.url, &page)?;
        let accepted = verdict.is_accept();

        let links = if accepted {
            resolve_links(&target.url, &page, self.normalize)
        } else {
            Vec::new()
        };

        let saved = match &self.pages {
            Some(pages) if accepted => Some(self.save_page(pages, &target.url, &page.raw_html)?),
            _ => None,
        };

        let link_keys = links.iter().map(|l| l.as_str().to_string()).collect();
        let record = self
            .dedup
            .settle(&target.url, verdict, page.status_code, link_keys)?;

        if record.status != PageStatus::Success {
            // Lost a race against an identical page committed first. The
            // file is still claimed, so nobody else can be writing to it.
            if let (Some(pages), Some(file)) = (&self.pages, saved) {
                pages.remove(&file)?;
                self.store.release_page_file(target.url.as_str())?;
            }
            return Ok(TaskOutcome::Finished {
                target,
                record,
                links: Vec::new(),
            });
        }

        Ok(TaskOutcome::Finished {
            target,
            record,
            links,
        })
    }

    /// Write the page to a file no other URL owns, returning its relative path.
    fn save_page(
        &self,
        pages: &PageWriter,
        url: &NormalizedUrl,
        html: &str,
    ) -> Result<String, CrawlError> {
        let file = self
            .store
            .claim_page_file(url.as_str(), |attempt| pages.relative_path(url, attempt))?;
        pages.write(&file, html)?;
        Ok(file)
    }

    /// Where the client ended up, when redirects took it outside the scope.
    fn out_of_scope_redirect(&self, page: &FetchedPage) -> Option<String> {
        let final_url = page.final_url.as_ref()?;
        match url_utils::normalize(final_url.as_str(), None, self.normalize) {
            Ok(landed) if self.scope.contains(&landed) => None,
            Ok(landed) => Some(landed.as_str().to_string()),
            Err(_) => Some(final_url.to_string()),
        }
    }
}

/// Resolve a page's raw hrefs into unique crawlable URLs, in document order.
fn resolve_links(
    url: &NormalizedUrl,
    page: &FetchedPage,
    options: NormalizeOptions,
) -> Vec<NormalizedUrl> {
    let base = page.base_url(url.as_url());
    let mut seen = HashSet::new();
    page.extracted_links
        .iter()
        .filter_map(|raw| url_utils::normalize(raw, Some(base), options).ok())
        .filter(url_utils::is_crawlable_resource)
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// Per-run bookkeeping owned by the crawl loop.
struct RunState {
    frontier: Frontier,
    known_hosts: HashSet<String>,
    succeeded: usize,
}

/// Breadth-first crawl controller.
pub struct Crawler {
    config: Arc<CrawlConfig>,
    seed: NormalizedUrl,
    scope: DomainScope,
    store: Arc<CrawlStore>,
    robots: Arc<dyn RobotsPolicy>,
    governor: Arc<Governor>,
    metrics: Arc<CrawlMetrics>,
    fetcher: Fetcher,
    cancel: Arc<watch::Sender<bool>>,
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        store: Arc<CrawlStore>,
        backend: Arc<dyn ScraperBackend>,
        robots: Arc<dyn RobotsPolicy>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        let normalize = NormalizeOptions {
            ignore_get_params: config.ignore_get_params,
        };
        let seed = url_utils::normalize(&config.seed_url, None, normalize)?;
        let scope = DomainScope::from_seed(&seed);

        let governor = Arc::new(Governor::new(
            config.concurrent_requests,
            config.request_delay,
        ));
        let dedup = Arc::new(DedupEngine::new(
            Arc::clone(&store),
            DedupOptions {
                check_canonical: !config.ignore_canonical,
                check_content: !config.ignore_duplicates,
                normalize,
            },
        ));
        let metrics = Arc::new(CrawlMetrics::new());
        let (cancel, _) = watch::channel(false);

        let fetcher = Fetcher {
            store: Arc::clone(&store),
            backend,
            governor: Arc::clone(&governor),
            dedup,
            pages: None,
            metrics: Arc::clone(&metrics),
            backoff: ExponentialBackoff::new(
                Config::RETRY_BACKOFF_BASE_MS,
                Config::RETRY_BACKOFF_MAX_MS,
            ),
            retry_limit: config.retry_limit,
            normalize,
            scope: scope.clone(),
        };

        Ok(Self {
            config: Arc::new(config),
            seed,
            scope,
            store,
            robots,
            governor,
            metrics,
            fetcher,
            cancel: Arc::new(cancel),
        })
    }

    /// Mirror accepted pages to disk.
    pub fn with_page_writer(mut self, pages: PageWriter) -> Self {
        self.fetcher.pages = Some(Arc::new(pages));
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.fetcher.backoff = backoff;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn seed(&self) -> &NormalizedUrl {
        &self.seed
    }

    pub fn scope(&self) -> &DomainScope {
        &self.scope
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn metrics(&self) -> &CrawlMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<CrawlStore> {
        &self.store
    }

    /// Run until the frontier drains, `max_pages` successes exist, or the
    /// crawl is cancelled. Safe to call again on the same output directory to
    /// resume: nothing with a terminal record is fetched twice.
    #[tracing::instrument(skip(self), fields(seed = %self.seed))]
    pub async fn run(&self) -> Result<CrawlReport, CrawlError> {
        let started = Instant::now();
        let mut run = RunState {
            frontier: Frontier::new(),
            known_hosts: HashSet::new(),
            succeeded: self.store.success_count()?,
        };

        self.seed_frontier(&mut run).await?;
        info!(
            "Crawling {} (scope {}{}) with {} queued, {} pages already saved",
            self.seed,
            self.seed.authority(),
            self.scope.path_prefix(),
            run.frontier.len(),
            run.succeeded
        );

        let mut cancel_rx = self.cancel.subscribe();
        let mut in_flight: JoinSet<Result<TaskOutcome, CrawlError>> = JoinSet::new();
        let mut fatal: Option<CrawlError> = None;
        let mut processed: u64 = 0;
        let mut last_progress_report = Instant::now();
        let max_pages = self.config.max_pages;
        let max_in_flight = self.config.concurrent_requests;

        loop {
            let stopping = *cancel_rx.borrow() || fatal.is_some();
            if stopping {
                // Wakes tasks still queued for admission so they stand down.
                self.governor.close();
            }

            // Phase 1: fill the pool up to the concurrency and page limits
            while !stopping && in_flight.len() < max_in_flight {
                if run.succeeded + in_flight.len() >= max_pages {
                    break;
                }
                let Some(target) = run.frontier.pop() else {
                    break;
                };
                let store = Arc::clone(&self.store);
                let key = target.url.as_str().to_string();
                let (depth, retries) = (target.depth, target.retries);
                let reserved =
                    blocking(move || Ok(store.reserve_with_retries(&key, depth, retries)?)).await;
                match reserved {
                    Ok(true) => {
                        let fetcher = self.fetcher.clone();
                        let cancel = self.cancel.subscribe();
                        in_flight.spawn(fetcher.run(target, cancel));
                    }
                    Ok(false) => debug!("{} already has a record, skipping", target.url),
                    Err(e) => {
                        fatal = Some(e);
                        self.cancel.send_replace(true);
                        break;
                    }
                }
            }

            // Nothing running and nothing dispatchable: done
            if in_flight.is_empty() {
                break;
            }

            // Phase 2: collect a finished task or notice cancellation
            tokio::select! {
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok(Ok(outcome)) => {
                            if let Err(e) = self.handle_outcome(&mut run, outcome).await {
                                error!("Stopping crawl: {}", e);
                                if fatal.is_none() {
                                    fatal = Some(e);
                                }
                                self.cancel.send_replace(true);
                            }
                            processed += 1;
                        }
                        Ok(Err(e)) => {
                            error!("Stopping crawl: {}", e);
                            if fatal.is_none() {
                                fatal = Some(e);
                            }
                            self.cancel.send_replace(true);
                        }
                        Err(e) => error!("Task join error: {}", e),
                    }

                    if (processed > 0 && processed % Config::PROGRESS_INTERVAL == 0)
                        || last_progress_report.elapsed().as_secs() >= Config::PROGRESS_TIME_SECS
                    {
                        info!(
                            "Progress: {} processed | {} | {} in flight | {}",
                            processed,
                            self.metrics.snapshot(),
                            in_flight.len(),
                            run.frontier.stats()
                        );
                        last_progress_report = Instant::now();
                    }
                }
                _ = cancelled(&mut cancel_rx), if !stopping => {
                    info!("Cancellation requested, waiting for {} in-flight fetches", in_flight.len());
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let interrupted = *cancel_rx.borrow();
        let max_pages_reached = !interrupted && run.succeeded >= max_pages && !run.frontier.is_empty();
        if interrupted {
            warn!(
                "Crawl interrupted with {} URLs still queued; run again to resume",
                run.frontier.len()
            );
        } else if max_pages_reached {
            info!("Reached max_pages ({}), stopping", max_pages);
        } else {
            info!("Crawl complete: frontier empty and no tasks in flight");
        }

        let manifest_entries = export::write_manifest(
            &self.store,
            self.fetcher.pages.as_deref(),
            &self.config.output_dir,
        )?;
        debug!("Manifest lists {} pages", manifest_entries);

        Ok(CrawlReport {
            seed_url: self.seed.as_str().to_string(),
            session: self.metrics.snapshot(),
            totals: self.store.status_counts()?,
            interrupted,
            max_pages_reached,
            frontier_remaining: run.frontier.len(),
            duration: started.elapsed(),
        })
    }

    async fn handle_outcome(
        &self,
        run: &mut RunState,
        outcome: TaskOutcome,
    ) -> Result<(), CrawlError> {
        match outcome {
            TaskOutcome::Released { target } => {
                self.metrics.released.inc();
                debug!("Released {} before dispatch", target.url);
            }
            TaskOutcome::Deferred { target, retries } => {
                self.metrics.released.inc();
                info!(
                    "Left {} pending after {} retries; it resumes next run",
                    target.url, retries
                );
            }
            TaskOutcome::Finished {
                target,
                record,
                links,
            } => {
                self.metrics.record(record.status);
                match record.status {
                    PageStatus::Success => {
                        run.succeeded += 1;
                        info!("Saved {} (depth {})", target.url, target.depth);
                        for link in links {
                            self.enqueue(run, CrawlTarget::new(link, target.depth + 1))
                                .await?;
                        }
                    }
                    PageStatus::Error => warn!(
                        "Failed {}: {}",
                        target.url,
                        record.error_message.as_deref().unwrap_or("unknown error")
                    ),
                    status => debug!(
                        "{} {}{}",
                        status,
                        target.url,
                        record
                            .error_message
                            .as_deref()
                            .map(|m| format!(" ({})", m))
                            .unwrap_or_default()
                    ),
                }
            }
        }
        Ok(())
    }

    /// Queue `target` unless its URL is already known, out of scope, too
    /// deep or refused by robots.txt. Refusals are recorded in the store.
    async fn enqueue(&self, run: &mut RunState, target: CrawlTarget) -> Result<(), CrawlError> {
        let (url, depth) = (&target.url, target.depth);
        if run.frontier.has_seen(url) {
            return Ok(());
        }
        if self.store.contains(url.as_str())? {
            run.frontier.mark_seen(url);
            return Ok(());
        }

        let refusal = if !self.scope.contains(url) {
            Some((PageStatus::SkippedDomain, None))
        } else if depth > self.config.max_depth {
            Some((PageStatus::SkippedDepth, None))
        } else if !self.robots_allows(run, url).await {
            self.metrics.robots_blocked.inc();
            Some((
                PageStatus::Error,
                Some("disallowed by robots.txt".to_string()),
            ))
        } else {
            None
        };

        match refusal {
            Some((status, message)) => {
                run.frontier.mark_seen(url);
                let store = Arc::clone(&self.store);
                let key = url.as_str().to_string();
                let recorded =
                    blocking(move || Ok(store.mark_unfetched(&key, depth, status, message)?))
                        .await?;
                if recorded {
                    self.metrics.record(status);
                }
            }
            None => {
                run.frontier.push(target);
            }
        }
        Ok(())
    }

    async fn robots_allows(&self, run: &mut RunState, url: &NormalizedUrl) -> bool {
        if run.known_hosts.insert(url.authority())
            && let Some(delay) = self.robots.crawl_delay(url).await
        {
            self.governor.raise_min_delay(delay);
        }
        self.robots.is_allowed(url).await
    }

    /// Queue the seed, anything a previous session left half-done, and the
    /// not-yet-known links of every page already saved.
    async fn seed_frontier(&self, run: &mut RunState) -> Result<(), CrawlError> {
        let stale = self.store.release_stale_reservations()?;
        if !stale.is_empty() {
            info!("Recovered {} unfinished URLs from a previous session", stale.len());
        }

        self.enqueue(run, CrawlTarget::new(self.seed.clone(), 0)).await?;

        for record in stale {
            match NormalizedUrl::from_stored(&record.url) {
                Ok(url) => {
                    let target = CrawlTarget::new(url, record.depth).with_retries(record.retries);
                    self.enqueue(run, target).await?
                }
                Err(e) => warn!("Dropping unreadable stored URL: {}", e),
            }
        }

        for url in self.store.all_success_urls()? {
            let Some(record) = self.store.lookup(&url)? else {
                continue;
            };
            for link in self.store.outgoing_links(&url)? {
                if let Ok(link) = NormalizedUrl::from_stored(&link) {
                    self.enqueue(run, CrawlTarget::new(link, record.depth + 1))
                        .await?;
                }
            }
        }
        Ok(())
    }
}
