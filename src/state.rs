use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Database creation error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("cannot commit {url}: record is already {status}")]
    InvalidTransition { url: String, status: PageStatus },

    #[error("cannot commit {0}: no reservation exists")]
    NotReserved(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Success,
    Error,
    SkippedDuplicate,
    SkippedCanonical,
    SkippedDepth,
    SkippedDomain,
}

impl PageStatus {
    pub const ALL: [PageStatus; 7] = [
        PageStatus::Pending,
        PageStatus::Success,
        PageStatus::Error,
        PageStatus::SkippedDuplicate,
        PageStatus::SkippedCanonical,
        PageStatus::SkippedDepth,
        PageStatus::SkippedDomain,
    ];

    pub fn is_terminal(self) -> bool {
        self != PageStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Success => "success",
            PageStatus::Error => "error",
            PageStatus::SkippedDuplicate => "skipped_duplicate",
            PageStatus::SkippedCanonical => "skipped_canonical",
            PageStatus::SkippedDepth => "skipped_depth",
            PageStatus::SkippedDomain => "skipped_domain",
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the crawl remembers about one normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub status: PageStatus,
    pub depth: u32,
    pub http_status_code: Option<u16>,
    pub content_hash: Option<String>,
    pub canonical_url: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub retries: u32,
    pub fetched_at: DateTime<Utc>,
}

impl PageRecord {
    fn pending(url: &str, depth: u32) -> Self {
        Self {
            url: url.to_string(),
            status: PageStatus::Pending,
            depth,
            http_status_code: None,
            content_hash: None,
            canonical_url: None,
            error_message: None,
            retries: 0,
            fetched_at: Utc::now(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Terminal result handed to [`CrawlStore::commit`] for a reserved URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        http_status_code: u16,
        content_hash: String,
        canonical_url: Option<String>,
        /// Normalized in-scope links found on the page, kept so a resumed crawl can re-walk them.
        links: Vec<String>,
    },
    /// Content identical to `duplicate_of`, which keeps the hash.
    SkippedDuplicate {
        http_status_code: u16,
        canonical_url: Option<String>,
        duplicate_of: String,
    },
    SkippedCanonical {
        http_status_code: u16,
        canonical_url: String,
    },
    /// Fetched, but redirects ended outside the crawl scope.
    RedirectedOutOfScope {
        http_status_code: u16,
        final_url: String,
    },
    Error {
        http_status_code: Option<u16>,
        message: String,
    },
}

impl Outcome {
    pub fn status(&self) -> PageStatus {
        match self {
            Outcome::Success { .. } => PageStatus::Success,
            Outcome::SkippedDuplicate { .. } => PageStatus::SkippedDuplicate,
            Outcome::SkippedCanonical { .. } => PageStatus::SkippedCanonical,
            Outcome::RedirectedOutOfScope { .. } => PageStatus::SkippedDomain,
            Outcome::Error { .. } => PageStatus::Error,
        }
    }
}

/// Per-status record counts across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts(BTreeMap<PageStatus, usize>);

impl StatusCounts {
    pub fn get(&self, status: PageStatus) -> usize {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    fn bump(&mut self, status: PageStatus) {
        *self.0.entry(status).or_insert(0) += 1;
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = PageStatus::ALL
            .iter()
            .map(|status| format!("{}={}", status, self.get(*status)))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

// ============================================================================
// DATABASE SCHEMA
// ============================================================================

/// Durable crawl state backed by redb. Every mutation is its own write
/// transaction, and redb serializes writers, so `reserve` is an atomic
/// check-and-insert even when called from many tasks at once.
pub struct CrawlStore {
    db: Arc<Database>,
}

impl CrawlStore {
    const PAGES: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("pages");
    const CONTENT_HASHES: TableDefinition<'_, &str, &str> = TableDefinition::new("content_hashes");
    const CANONICALS: TableDefinition<'_, &str, &str> = TableDefinition::new("canonicals");
    const LINKS: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("links");
    /// url -> mirrored file, relative to the pages directory.
    const PAGE_FILES: TableDefinition<'_, &str, &str> = TableDefinition::new("page_files");
    /// mirrored file -> url; keeps two URLs from sharing one file.
    const FILE_OWNERS: TableDefinition<'_, &str, &str> = TableDefinition::new("file_owners");

    pub const FILE_NAME: &'static str = "crawl_state.redb";

    /// Open (or create) the store inside `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let data_path = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_path)?;

        let db = Database::create(data_path.join(Self::FILE_NAME))?;

        let write_txn = db.begin_write()?;
        {
            let _pages = write_txn.open_table(Self::PAGES)?;
            let _hashes = write_txn.open_table(Self::CONTENT_HASHES)?;
            let _canonicals = write_txn.open_table(Self::CANONICALS)?;
            let _links = write_txn.open_table(Self::LINKS)?;
            let _files = write_txn.open_table(Self::PAGE_FILES)?;
            let _owners = write_txn.open_table(Self::FILE_OWNERS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========================================================================
    // POINT QUERIES
    // ========================================================================

    pub fn lookup(&self, url: &str) -> Result<Option<PageRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::PAGES)?;
        match table.get(url)? {
            Some(bytes) => Ok(Some(PageRecord::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, url: &str) -> Result<bool, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::PAGES)?;
        Ok(table.get(url)?.is_some())
    }

    /// The first successful record that produced this content fingerprint.
    pub fn find_by_content_hash(&self, hash: &str) -> Result<Option<PageRecord>, StoreError> {
        self.find_through_index(Self::CONTENT_HASHES, hash)
    }

    /// The first record that declared this canonical URL.
    pub fn find_by_canonical(&self, canonical: &str) -> Result<Option<PageRecord>, StoreError> {
        self.find_through_index(Self::CANONICALS, canonical)
    }

    fn find_through_index(
        &self,
        index: TableDefinition<'_, &str, &str>,
        key: &str,
    ) -> Result<Option<PageRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index)?;
        let Some(url) = index.get(key)?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        let pages = read_txn.open_table(Self::PAGES)?;
        match pages.get(url.as_str())? {
            Some(bytes) => Ok(Some(PageRecord::decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    pub fn outgoing_links(&self, url: &str) -> Result<Vec<String>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::LINKS)?;
        match table.get(url)? {
            Some(bytes) => Ok(serde_json::from_slice(bytes.value())?),
            None => Ok(Vec::new()),
        }
    }

    /// The file `url` was mirrored to, relative to the pages directory.
    pub fn page_file(&self, url: &str) -> Result<Option<String>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::PAGE_FILES)?;
        Ok(table.get(url)?.map(|v| v.value().to_string()))
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Claim `url` for fetching. Returns false when any record already exists,
    /// in which case the caller must not fetch it.
    pub fn reserve(&self, url: &str, depth: u32) -> Result<bool, StoreError> {
        self.reserve_with_retries(url, depth, 0)
    }

    /// [`reserve`](Self::reserve) for a URL whose earlier sessions already
    /// spent `retries` attempts on transient failures.
    pub fn reserve_with_retries(
        &self,
        url: &str,
        depth: u32,
        retries: u32,
    ) -> Result<bool, StoreError> {
        let mut record = PageRecord::pending(url, depth);
        record.retries = retries;
        self.insert_if_absent(record)
    }

    /// Record a URL that was never fetched (depth or domain limit, robots
    /// refusal). A no-op returning false when the URL is already known.
    pub fn mark_unfetched(
        &self,
        url: &str,
        depth: u32,
        status: PageStatus,
        message: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut record = PageRecord::pending(url, depth);
        record.status = status;
        record.error_message = message;
        self.insert_if_absent(record)
    }

    fn insert_if_absent(&self, record: PageRecord) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(Self::PAGES)?;
            if table.get(record.url.as_str())?.is_some() {
                false
            } else {
                table.insert(record.url.as_str(), record.encode()?.as_slice())?;
                true
            }
        };
        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    /// Move a pending record to its terminal state.
    pub fn commit(&self, url: &str, outcome: Outcome) -> Result<PageRecord, StoreError> {
        self.commit_with(url, outcome, false)
    }

    /// Like [`commit`](Self::commit), but a success whose content hash is
    /// already owned by another URL is stored as `skipped_duplicate` of that
    /// URL instead. The check and the write share one transaction, so two
    /// identical pages racing each other cannot both end up as successes.
    pub fn commit_unique_content(
        &self,
        url: &str,
        outcome: Outcome,
    ) -> Result<PageRecord, StoreError> {
        self.commit_with(url, outcome, true)
    }

    fn commit_with(
        &self,
        url: &str,
        outcome: Outcome,
        unique_content: bool,
    ) -> Result<PageRecord, StoreError> {
        let write_txn = self.db.begin_write()?;
        let record = Self::commit_in_txn(&write_txn, url, outcome, unique_content)?;
        write_txn.commit()?;
        Ok(record)
    }

    fn commit_in_txn(
        txn: &WriteTransaction,
        url: &str,
        outcome: Outcome,
        unique_content: bool,
    ) -> Result<PageRecord, StoreError> {
        let mut pages = txn.open_table(Self::PAGES)?;
        let existing = pages.get(url)?.map(|bytes| bytes.value().to_vec());
        let mut record = match existing {
            Some(bytes) => PageRecord::decode(&bytes)?,
            None => return Err(StoreError::NotReserved(url.to_string())),
        };
        if record.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                url: url.to_string(),
                status: record.status,
            });
        }

        let mut hashes = txn.open_table(Self::CONTENT_HASHES)?;
        let mut canonicals = txn.open_table(Self::CANONICALS)?;

        let outcome = match outcome {
            Outcome::Success {
                http_status_code,
                content_hash,
                canonical_url,
                links,
            } if unique_content => {
                let owner = hashes
                    .get(content_hash.as_str())?
                    .map(|v| v.value().to_string());
                match owner {
                    Some(original) if original != url => Outcome::SkippedDuplicate {
                        http_status_code,
                        canonical_url,
                        duplicate_of: original,
                    },
                    _ => Outcome::Success {
                        http_status_code,
                        content_hash,
                        canonical_url,
                        links,
                    },
                }
            }
            other => other,
        };

        record.status = outcome.status();
        record.fetched_at = Utc::now();
        match outcome {
            Outcome::Success {
                http_status_code,
                content_hash,
                canonical_url,
                links,
            } => {
                if hashes.get(content_hash.as_str())?.is_none() {
                    hashes.insert(content_hash.as_str(), url)?;
                }
                if let Some(canonical) = canonical_url.as_deref() {
                    let claimed = canonicals.get(canonical)?.is_some();
                    if !claimed {
                        canonicals.insert(canonical, url)?;
                    }
                }
                let mut links_table = txn.open_table(Self::LINKS)?;
                links_table.insert(url, serde_json::to_vec(&links)?.as_slice())?;

                record.http_status_code = Some(http_status_code);
                record.content_hash = Some(content_hash);
                record.canonical_url = canonical_url;
                record.error_message = None;
            }
            Outcome::SkippedDuplicate {
                http_status_code,
                canonical_url,
                duplicate_of,
            } => {
                record.http_status_code = Some(http_status_code);
                record.canonical_url = canonical_url;
                record.error_message = Some(format!("duplicate of {}", duplicate_of));
            }
            Outcome::SkippedCanonical {
                http_status_code,
                canonical_url,
            } => {
                if canonicals.get(canonical_url.as_str())?.is_none() {
                    canonicals.insert(canonical_url.as_str(), url)?;
                }
                record.http_status_code = Some(http_status_code);
                record.canonical_url = Some(canonical_url);
                record.error_message = None;
            }
            Outcome::RedirectedOutOfScope {
                http_status_code,
                final_url,
            } => {
                record.http_status_code = Some(http_status_code);
                record.error_message = Some(format!("redirected out of scope to {}", final_url));
            }
            Outcome::Error {
                http_status_code,
                message,
            } => {
                record.http_status_code = http_status_code;
                record.error_message = Some(message);
            }
        }

        pages.insert(url, record.encode()?.as_slice())?;
        Ok(record)
    }

    /// Bump the retry counter of a pending record and remember the last failure.
    pub fn record_retry(&self, url: &str, message: &str) -> Result<u32, StoreError> {
        let write_txn = self.db.begin_write()?;
        let retries = {
            let mut table = write_txn.open_table(Self::PAGES)?;
            let existing = table.get(url)?.map(|bytes| bytes.value().to_vec());
            let mut record = match existing {
                Some(bytes) => PageRecord::decode(&bytes)?,
                None => return Err(StoreError::NotReserved(url.to_string())),
            };
            if record.status.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    url: url.to_string(),
                    status: record.status,
                });
            }
            record.retries += 1;
            record.error_message = Some(message.to_string());
            table.insert(url, record.encode()?.as_slice())?;
            record.retries
        };
        write_txn.commit()?;
        Ok(retries)
    }

    /// Drop a reservation that will not be fetched this session. Terminal
    /// records are left untouched.
    pub fn release(&self, url: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let released = {
            let mut table = write_txn.open_table(Self::PAGES)?;
            let existing = table.get(url)?.map(|bytes| bytes.value().to_vec());
            match existing {
                Some(bytes) if !PageRecord::decode(&bytes)?.status.is_terminal() => {
                    table.remove(url)?;
                    true
                }
                _ => false,
            }
        };
        write_txn.commit()?;
        Ok(released)
    }

    /// Remove every pending record left behind by an earlier session and
    /// return them, so they can be queued again with their depth and retry
    /// count intact.
    pub fn release_stale_reservations(&self) -> Result<Vec<PageRecord>, StoreError> {
        let write_txn = self.db.begin_write()?;
        let stale = {
            let mut table = write_txn.open_table(Self::PAGES)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (_key, value) = entry?;
                let record = PageRecord::decode(value.value())?;
                if record.status == PageStatus::Pending {
                    stale.push(record);
                }
            }
            for record in &stale {
                table.remove(record.url.as_str())?;
            }
            stale
        };
        write_txn.commit()?;
        Ok(stale)
    }

    /// Give `url` a file of its own. `candidate(n)` proposes the n-th choice
    /// of path; the first one no other URL owns is taken. A URL that already
    /// holds a file keeps it.
    pub fn claim_page_file<F>(&self, url: &str, candidate: F) -> Result<String, StoreError>
    where
        F: Fn(u32) -> String,
    {
        let write_txn = self.db.begin_write()?;
        let path = {
            let mut files = write_txn.open_table(Self::PAGE_FILES)?;
            let mut owners = write_txn.open_table(Self::FILE_OWNERS)?;
            let existing = files.get(url)?.map(|v| v.value().to_string());
            match existing {
                Some(path) => path,
                None => {
                    let mut attempt = 0;
                    let path = loop {
                        let path = candidate(attempt);
                        if owners.get(path.as_str())?.is_none() {
                            break path;
                        }
                        attempt += 1;
                    };
                    owners.insert(path.as_str(), url)?;
                    files.insert(url, path.as_str())?;
                    path
                }
            }
        };
        write_txn.commit()?;
        Ok(path)
    }

    /// Drop the file claim of `url`, returning the path it held.
    pub fn release_page_file(&self, url: &str) -> Result<Option<String>, StoreError> {
        let write_txn = self.db.begin_write()?;
        let released = {
            let mut files = write_txn.open_table(Self::PAGE_FILES)?;
            let mut owners = write_txn.open_table(Self::FILE_OWNERS)?;
            let path = files.remove(url)?.map(|v| v.value().to_string());
            if let Some(path) = path.as_deref() {
                owners.remove(path)?;
            }
            path
        };
        write_txn.commit()?;
        Ok(released)
    }

    // ========================================================================
    // SCANS
    // ========================================================================

    /// Visit every record in key order without collecting them first.
    pub fn for_each_record<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(PageRecord) -> Result<(), StoreError>,
    {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::PAGES)?;
        for entry in table.iter()? {
            let (_key, value) = entry?;
            f(PageRecord::decode(value.value())?)?;
        }
        Ok(())
    }

    pub fn all_success_urls(&self) -> Result<Vec<String>, StoreError> {
        let mut urls = Vec::new();
        self.for_each_record(|record| {
            if record.status == PageStatus::Success {
                urls.push(record.url);
            }
            Ok(())
        })?;
        Ok(urls)
    }

    pub fn failed_records(&self) -> Result<Vec<PageRecord>, StoreError> {
        let mut failed = Vec::new();
        self.for_each_record(|record| {
            if record.status == PageStatus::Error {
                failed.push(record);
            }
            Ok(())
        })?;
        Ok(failed)
    }

    pub fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        self.for_each_record(|record| {
            counts.bump(record.status);
            Ok(())
        })?;
        Ok(counts)
    }

    pub fn success_count(&self) -> Result<usize, StoreError> {
        Ok(self.status_counts()?.get(PageStatus::Success))
    }

    pub fn record_count(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::PAGES)?;
        Ok(table.len()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn success(hash: &str, links: &[&str]) -> Outcome {
        Outcome::Success {
            http_status_code: 200,
            content_hash: hash.to_string(),
            canonical_url: None,
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_store_creation() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();

        assert!(store.reserve("https://test.local/", 0).unwrap());
        assert!(!store.reserve("https://test.local/", 0).unwrap());

        let record = store.lookup("https://test.local/").unwrap().unwrap();
        assert_eq!(record.status, PageStatus::Pending);
        assert_eq!(record.depth, 0);
    }

    #[test]
    fn test_concurrent_reserve_grants_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CrawlStore::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.reserve("https://test.local/race", 1).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_commit_success_indexes_hash_canonical_and_links() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let url = "https://test.local/a";

        store.reserve(url, 1).unwrap();
        let record = store
            .commit(
                url,
                Outcome::Success {
                    http_status_code: 200,
                    content_hash: "abc".to_string(),
                    canonical_url: Some(url.to_string()),
                    links: vec!["https://test.local/b".to_string()],
                },
            )
            .unwrap();

        assert_eq!(record.status, PageStatus::Success);
        assert_eq!(store.find_by_content_hash("abc").unwrap().unwrap().url, url);
        assert_eq!(store.find_by_canonical(url).unwrap().unwrap().url, url);
        assert_eq!(store.outgoing_links(url).unwrap(), vec!["https://test.local/b"]);
        assert_eq!(store.all_success_urls().unwrap(), vec![url.to_string()]);
        assert!(store.find_by_content_hash("missing").unwrap().is_none());
    }

    #[test]
    fn test_terminal_records_are_immutable() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let url = "https://test.local/a";

        store.reserve(url, 0).unwrap();
        store.commit(url, success("h1", &[])).unwrap();

        let err = store
            .commit(
                url,
                Outcome::Error {
                    http_status_code: Some(500),
                    message: "boom".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                status: PageStatus::Success,
                ..
            }
        ));
        assert!(!store.release(url).unwrap());
        assert_eq!(store.lookup(url).unwrap().unwrap().status, PageStatus::Success);
    }

    #[test]
    fn test_commit_without_reservation_fails() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let err = store.commit("https://test.local/x", success("h", &[])).unwrap_err();
        assert!(matches!(err, StoreError::NotReserved(_)));
    }

    #[test]
    fn test_commit_unique_content_demotes_second_owner() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();

        store.reserve("https://test.local/a", 0).unwrap();
        store.reserve("https://test.local/b", 0).unwrap();
        store
            .commit_unique_content("https://test.local/a", success("same", &[]))
            .unwrap();
        let second = store
            .commit_unique_content("https://test.local/b", success("same", &[]))
            .unwrap();

        assert_eq!(second.status, PageStatus::SkippedDuplicate);
        assert!(second.content_hash.is_none());
        assert_eq!(
            second.error_message.as_deref(),
            Some("duplicate of https://test.local/a")
        );
        assert_eq!(
            store.find_by_content_hash("same").unwrap().unwrap().url,
            "https://test.local/a"
        );
    }

    #[test]
    fn test_plain_commit_allows_shared_hash() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();

        for url in ["https://test.local/a", "https://test.local/b"] {
            store.reserve(url, 0).unwrap();
            let record = store.commit(url, success("same", &[])).unwrap();
            assert_eq!(record.status, PageStatus::Success);
        }
        assert_eq!(
            store.find_by_content_hash("same").unwrap().unwrap().url,
            "https://test.local/a"
        );
    }

    #[test]
    fn test_retry_counter_and_release() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let url = "https://test.local/flaky";

        store.reserve(url, 2).unwrap();
        assert_eq!(store.record_retry(url, "HTTP 503").unwrap(), 1);
        assert_eq!(store.record_retry(url, "HTTP 503").unwrap(), 2);
        assert_eq!(store.lookup(url).unwrap().unwrap().retries, 2);

        assert!(store.release(url).unwrap());
        assert!(store.lookup(url).unwrap().is_none());
        assert!(store.reserve(url, 2).unwrap());
    }

    #[test]
    fn test_release_stale_reservations_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = CrawlStore::open(dir.path()).unwrap();
            store.reserve("https://test.local/done", 0).unwrap();
            store.commit("https://test.local/done", success("h", &[])).unwrap();
            store.reserve("https://test.local/half", 3).unwrap();
        }

        let store = CrawlStore::open(dir.path()).unwrap();
        let stale = store.release_stale_reservations().unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].url, "https://test.local/half");
        assert_eq!(stale[0].depth, 3);
        assert!(store.lookup("https://test.local/half").unwrap().is_none());
        assert_eq!(
            store.lookup("https://test.local/done").unwrap().unwrap().status,
            PageStatus::Success
        );
        assert!(store.release_stale_reservations().unwrap().is_empty());
    }

    #[test]
    fn test_mark_unfetched_and_counts() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();

        assert!(store
            .mark_unfetched("https://other.local/", 1, PageStatus::SkippedDomain, None)
            .unwrap());
        assert!(!store
            .mark_unfetched("https://other.local/", 1, PageStatus::SkippedDomain, None)
            .unwrap());
        store
            .mark_unfetched(
                "https://test.local/private",
                1,
                PageStatus::Error,
                Some("disallowed by robots.txt".to_string()),
            )
            .unwrap();

        let counts = store.status_counts().unwrap();
        assert_eq!(counts.get(PageStatus::SkippedDomain), 1);
        assert_eq!(counts.get(PageStatus::Error), 1);
        assert_eq!(counts.total(), 2);

        let failed = store.failed_records().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].error_message.as_deref(),
            Some("disallowed by robots.txt")
        );
    }

    #[test]
    fn test_page_files_are_never_shared() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let candidate = |n: u32| match n {
            0 => "ex.com/docs/a/index.html".to_string(),
            n => format!("ex.com/docs/a/index~{}.html", n + 1),
        };

        let first = store.claim_page_file("https://ex.com/docs/a", candidate).unwrap();
        let second = store.claim_page_file("https://ex.com/docs/a/", candidate).unwrap();
        assert_eq!(first, "ex.com/docs/a/index.html");
        assert_eq!(second, "ex.com/docs/a/index~2.html");

        // Claiming again is stable.
        assert_eq!(
            store.claim_page_file("https://ex.com/docs/a/", candidate).unwrap(),
            second
        );
        assert_eq!(
            store.page_file("https://ex.com/docs/a").unwrap().as_deref(),
            Some("ex.com/docs/a/index.html")
        );

        assert_eq!(
            store.release_page_file("https://ex.com/docs/a").unwrap().as_deref(),
            Some("ex.com/docs/a/index.html")
        );
        assert!(store.page_file("https://ex.com/docs/a").unwrap().is_none());
        assert!(store.release_page_file("https://ex.com/docs/a").unwrap().is_none());
        assert_eq!(
            store.claim_page_file("https://ex.com/docs/b", candidate).unwrap(),
            "ex.com/docs/a/index.html"
        );
    }

    #[test]
    fn test_retry_count_survives_stale_recovery() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let url = "https://test.local/flaky";

        store.reserve(url, 1).unwrap();
        store.record_retry(url, "HTTP 503").unwrap();

        let stale = store.release_stale_reservations().unwrap();
        assert_eq!(stale[0].retries, 1);

        assert!(store.reserve_with_retries(url, 1, stale[0].retries).unwrap());
        assert_eq!(store.record_retry(url, "HTTP 503").unwrap(), 2);
    }

    #[test]
    fn test_redirect_out_of_scope_is_skipped_domain() {
        let dir = TempDir::new().unwrap();
        let store = CrawlStore::open(dir.path()).unwrap();
        let url = "https://test.local/docs/moved";

        store.reserve(url, 1).unwrap();
        let record = store
            .commit(
                url,
                Outcome::RedirectedOutOfScope {
                    http_status_code: 200,
                    final_url: "https://elsewhere.local/".to_string(),
                },
            )
            .unwrap();
        assert_eq!(record.status, PageStatus::SkippedDomain);
        assert!(record.content_hash.is_none());
        assert_eq!(
            record.error_message.as_deref(),
            Some("redirected out of scope to https://elsewhere.local/")
        );
    }
}
