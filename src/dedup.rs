//! Decides whether a fetched page is new content worth keeping.
//!
//! Two checks run in order. The canonical check skips a page whose declared
//! `<link rel="canonical">` names some other URL. The content check
//! fingerprints the page's visible text and skips it when another URL
//! already produced the same fingerprint.

use crate::backend::FetchedPage;
use crate::parser;
use crate::state::{CrawlStore, Outcome, PageRecord, StoreError};
use crate::url_utils::{normalize, NormalizeOptions, NormalizedUrl};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOptions {
    /// Skip pages whose canonical points elsewhere.
    pub check_canonical: bool,
    /// Skip pages whose visible text matches an already stored page.
    pub check_content: bool,
    /// Applied to canonical URLs so they compare equal to frontier keys.
    pub normalize: NormalizeOptions,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            check_canonical: true,
            check_content: true,
            normalize: NormalizeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Accept {
        content_hash: String,
        canonical_url: Option<String>,
    },
    SkipCanonicalMismatch {
        canonical_url: String,
    },
    SkipDuplicateContent {
        content_hash: String,
        canonical_url: Option<String>,
        duplicate_of: String,
    },
}

impl DedupVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, DedupVerdict::Accept { .. })
    }
}

/// SHA-256 of the page's visible text, lowercase hex.
pub fn content_hash(raw_html: &str) -> String {
    let text = parser::visible_text(raw_html);
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct DedupEngine {
    store: Arc<CrawlStore>,
    options: DedupOptions,
}

impl DedupEngine {
    pub fn new(store: Arc<CrawlStore>, options: DedupOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> DedupOptions {
        self.options
    }

    /// Resolve and normalize the page's declared canonical. Unparseable
    /// declarations count as no declaration.
    pub fn declared_canonical(&self, url: &NormalizedUrl, page: &FetchedPage) -> Option<String> {
        let raw = page.canonical_url.as_deref()?;
        match normalize(raw, Some(page.base_url(url.as_url())), self.options.normalize) {
            Ok(canonical) => Some(canonical.as_str().to_string()),
            Err(e) => {
                debug!("Ignoring canonical on {}: {}", url, e);
                None
            }
        }
    }

    /// Classify a fetched page. Read-only; nothing is written until [`settle`](Self::settle).
    pub fn evaluate(
        &self,
        url: &NormalizedUrl,
        page: &FetchedPage,
    ) -> Result<DedupVerdict, StoreError> {
        let canonical_url = self.declared_canonical(url, page);

        if self.options.check_canonical
            && let Some(canonical) = canonical_url.as_deref()
            && canonical != url.as_str()
        {
            return Ok(DedupVerdict::SkipCanonicalMismatch {
                canonical_url: canonical.to_string(),
            });
        }

        let content_hash = content_hash(&page.raw_html);

        if self.options.check_content
            && let Some(original) = self.store.find_by_content_hash(&content_hash)?
            && original.url != url.as_str()
        {
            return Ok(DedupVerdict::SkipDuplicateContent {
                content_hash,
                canonical_url,
                duplicate_of: original.url,
            });
        }

        Ok(DedupVerdict::Accept {
            content_hash,
            canonical_url,
        })
    }

    /// Commit the verdict for a reserved URL. When content checking is on,
    /// an accepted page can still come back as `skipped_duplicate` if a
    /// concurrent fetch of identical content committed first.
    pub fn settle(
        &self,
        url: &NormalizedUrl,
        verdict: DedupVerdict,
        http_status_code: u16,
        links: Vec<String>,
    ) -> Result<PageRecord, StoreError> {
        match verdict {
            DedupVerdict::Accept {
                content_hash,
                canonical_url,
            } => {
                let outcome = Outcome::Success {
                    http_status_code,
                    content_hash,
                    canonical_url,
                    links,
                };
                if self.options.check_content {
                    self.store.commit_unique_content(url.as_str(), outcome)
                } else {
                    self.store.commit(url.as_str(), outcome)
                }
            }
            DedupVerdict::SkipCanonicalMismatch { canonical_url } => self.store.commit(
                url.as_str(),
                Outcome::SkippedCanonical {
                    http_status_code,
                    canonical_url,
                },
            ),
            DedupVerdict::SkipDuplicateContent {
                canonical_url,
                duplicate_of,
                ..
            } => self.store.commit(
                url.as_str(),
                Outcome::SkippedDuplicate {
                    http_status_code,
                    canonical_url,
                    duplicate_of,
                },
            ),
        }
    }
}
