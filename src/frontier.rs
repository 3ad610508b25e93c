use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::url_utils::NormalizedUrl;

/// A URL waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub url: NormalizedUrl,
    pub depth: u32,
    /// Transient failures already spent on this URL by earlier sessions.
    pub retries: u32,
    pub discovered_at: DateTime<Utc>,
}

impl CrawlTarget {
    pub fn new(url: NormalizedUrl, depth: u32) -> Self {
        Self {
            url,
            depth,
            retries: 0,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// In-memory FIFO of crawl targets. Each URL enters at most once per session,
/// which keeps the queue breadth-first and makes shallow pages win races
/// against deeper paths to the same URL.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<CrawlTarget>,
    seen: HashSet<NormalizedUrl>,
    queued_per_host: HashMap<String, usize>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `target` unless its URL was seen before. Returns whether it was queued.
    pub fn push(&mut self, target: CrawlTarget) -> bool {
        if !self.seen.insert(target.url.clone()) {
            return false;
        }
        *self
            .queued_per_host
            .entry(target.url.authority())
            .or_insert(0) += 1;
        self.queue.push_back(target);
        true
    }

    pub fn pop(&mut self) -> Option<CrawlTarget> {
        let target = self.queue.pop_front()?;
        let authority = target.url.authority();
        if let Some(count) = self.queued_per_host.get_mut(&authority) {
            *count -= 1;
            if *count == 0 {
                self.queued_per_host.remove(&authority);
            }
        }
        Some(target)
    }

    /// Remember a URL without queueing it, so later discoveries are ignored.
    pub fn mark_seen(&mut self, url: &NormalizedUrl) {
        if !self.seen.contains(url) {
            self.seen.insert(url.clone());
        }
    }

    pub fn has_seen(&self, url: &NormalizedUrl) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> FrontierStats {
        FrontierStats {
            total_queued: self.queue.len(),
            hosts_with_work: self.queued_per_host.len(),
            total_seen: self.seen.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierStats {
    pub total_queued: usize,
    pub hosts_with_work: usize,
    pub total_seen: usize,
}

impl std::fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frontier: {} queued URLs on {} hosts, {} seen",
            self.total_queued, self.hosts_with_work, self.total_seen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str, depth: u32) -> CrawlTarget {
        CrawlTarget::new(NormalizedUrl::from_stored(url).unwrap(), depth)
    }

    #[test]
    fn test_fifo_order() {
        let mut frontier = Frontier::new();
        assert!(frontier.push(target("https://ex.com/a", 0)));
        assert!(frontier.push(target("https://ex.com/b", 1)));
        assert!(frontier.push(target("https://ex.com/c", 1)));

        let order: Vec<String> = std::iter::from_fn(|| frontier.pop())
            .map(|t| t.url.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["https://ex.com/a", "https://ex.com/b", "https://ex.com/c"]);
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_url_enters_once_per_session() {
        let mut frontier = Frontier::new();
        assert!(frontier.push(target("https://ex.com/a", 1)));
        assert!(!frontier.push(target("https://ex.com/a", 3)));
        frontier.pop();
        assert!(!frontier.push(target("https://ex.com/a", 1)));

        let skipped = NormalizedUrl::from_stored("https://ex.com/skip").unwrap();
        frontier.mark_seen(&skipped);
        assert!(frontier.has_seen(&skipped));
        assert!(!frontier.push(CrawlTarget::new(skipped, 0)));
        assert_eq!(frontier.len(), 0);
    }

    #[test]
    fn test_stats() {
        let mut frontier = Frontier::new();
        frontier.push(target("https://ex.com/a", 0));
        frontier.push(target("https://ex.com/b", 0));
        frontier.push(target("https://other.com/", 0));
        frontier.pop();

        let stats = frontier.stats();
        assert_eq!(stats.total_queued, 2);
        assert_eq!(stats.hosts_with_work, 2);
        assert_eq!(stats.total_seen, 3);
        assert_eq!(
            stats.to_string(),
            "Frontier: 2 queued URLs on 2 hosts, 3 seen"
        );
    }
}
