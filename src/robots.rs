use crate::network::HttpClient;
use crate::url_utils::{robots_url, NormalizedUrl};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether the crawler may fetch a URL.
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    async fn is_allowed(&self, url: &NormalizedUrl) -> bool;

    /// Minimum spacing the host asks for, if any.
    async fn crawl_delay(&self, _url: &NormalizedUrl) -> Option<Duration> {
        None
    }
}

/// Parsed robots.txt for one host.
#[derive(Debug, Clone)]
pub struct RobotsTxt {
    groups: Vec<Group>,
    user_agent: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Rule {
    is_allow: bool,
    path: String,
    regex: Option<Regex>,
}

impl Rule {
    fn new(is_allow: bool, path: &str) -> Self {
        Self {
            is_allow,
            path: path.to_string(),
            regex: Self::create_regex(path),
        }
    }

    /// `*` and a trailing `$` are the only robots.txt wildcards; plain paths use a prefix test.
    fn create_regex(pattern: &str) -> Option<Regex> {
        if !pattern.contains('*') && !pattern.ends_with('$') {
            return None;
        }
        let mut regex_pattern = regex::escape(pattern).replace("\\*", ".*");
        if regex_pattern.ends_with("\\$") {
            regex_pattern.truncate(regex_pattern.len() - 2);
            regex_pattern.push('$');
        }
        Regex::new(&format!("^{}", regex_pattern)).ok()
    }

    fn matches(&self, path: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(path),
            None => path.starts_with(&self.path),
        }
    }
}

impl RobotsTxt {
    pub fn new(content: &str, user_agent: &str) -> Self {
        Self {
            groups: Self::parse(content),
            user_agent: user_agent.to_string(),
        }
    }

    /// A robots.txt that allows everything; used when the file is missing or unreachable.
    pub fn allow_all(user_agent: &str) -> Self {
        Self {
            groups: Vec::new(),
            user_agent: user_agent.to_string(),
        }
    }

    fn parse(content: &str) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_lines = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // Consecutive user-agent lines share one group.
                    if !in_agent_lines && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_lines = true;
                }
                "disallow" => {
                    in_agent_lines = false;
                    if !value.is_empty() {
                        current.rules.push(Rule::new(false, value));
                    }
                }
                "allow" => {
                    in_agent_lines = false;
                    if !value.is_empty() {
                        current.rules.push(Rule::new(true, value));
                    }
                }
                "crawl-delay" => {
                    in_agent_lines = false;
                    if let Ok(secs) = value.parse::<f64>()
                        && secs.is_finite()
                        && secs >= 0.0
                    {
                        current.crawl_delay = Some(Duration::from_secs_f64(secs));
                    }
                }
                _ => {}
            }
        }

        if !current.agents.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// The group that applies to `user_agent`: the longest matching product
    /// token wins, `*` is the fallback.
    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        let product = user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let specific = self
            .groups
            .iter()
            .flat_map(|g| g.agents.iter().map(move |a| (a, g)))
            .filter(|(agent, _)| agent.as_str() != "*" && product.starts_with(agent.as_str()))
            .max_by_key(|(agent, _)| agent.len())
            .map(|(_, g)| g);

        specific.or_else(|| {
            self.groups
                .iter()
                .find(|g| g.agents.iter().any(|a| a == "*"))
        })
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match url::Url::parse(url) {
            Ok(parsed) => {
                let mut path = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    path.push('?');
                    path.push_str(query);
                }
                self.is_path_allowed(&path, user_agent)
            }
            Err(_) => true,
        }
    }

    /// Longest matching rule wins; on a tie `Allow` beats `Disallow`.
    pub fn is_path_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        group
            .rules
            .iter()
            .filter(|rule| rule.matches(path))
            .max_by_key(|rule| (rule.path.len(), rule.is_allow))
            .is_none_or(|rule| rule.is_allow)
    }

    pub fn crawl_delay_for(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent).and_then(|g| g.crawl_delay)
    }
}

impl Default for RobotsTxt {
    fn default() -> Self {
        Self::allow_all(crate::config::Config::DEFAULT_USER_AGENT)
    }
}

#[async_trait]
impl RobotsPolicy for RobotsTxt {
    async fn is_allowed(&self, url: &NormalizedUrl) -> bool {
        RobotsTxt::is_allowed(self, url.as_str(), &self.user_agent)
    }

    async fn crawl_delay(&self, _url: &NormalizedUrl) -> Option<Duration> {
        self.crawl_delay_for(&self.user_agent)
    }
}

/// Fetches each host's robots.txt once and answers from the cached copy afterwards.
pub struct HostRobotsCache {
    http: Arc<HttpClient>,
    cache: DashMap<String, Arc<RobotsTxt>>,
}

impl HostRobotsCache {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            cache: DashMap::new(),
        }
    }

    async fn rules_for(&self, url: &NormalizedUrl) -> Arc<RobotsTxt> {
        let authority = url.authority();
        if let Some(cached) = self.cache.get(&authority) {
            return Arc::clone(cached.value());
        }

        let robots = Arc::new(self.fetch(url).await);
        self.cache.insert(authority, Arc::clone(&robots));
        robots
    }

    async fn fetch(&self, url: &NormalizedUrl) -> RobotsTxt {
        let user_agent = self.http.user_agent();
        let location = robots_url(url);
        match self.http.get(&location).await {
            Ok(response) if (200..300).contains(&response.status_code) => {
                debug!("Loaded robots.txt for {}", url.authority());
                RobotsTxt::new(&response.text(), user_agent)
            }
            Ok(response) => {
                debug!(
                    "robots.txt for {} returned HTTP {}, allowing all",
                    url.authority(),
                    response.status_code
                );
                RobotsTxt::allow_all(user_agent)
            }
            Err(e) => {
                warn!("Could not fetch {}: {}, allowing all", location, e);
                RobotsTxt::allow_all(user_agent)
            }
        }
    }
}

#[async_trait]
impl RobotsPolicy for HostRobotsCache {
    async fn is_allowed(&self, url: &NormalizedUrl) -> bool {
        let rules = self.rules_for(url).await;
        rules.is_allowed(url.as_str(), self.http.user_agent())
    }

    async fn crawl_delay(&self, url: &NormalizedUrl) -> Option<Duration> {
        self.rules_for(url).await.crawl_delay_for(self.http.user_agent())
    }
}
