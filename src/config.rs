use std::collections::HashSet;
use std::time::Duration;

use crate::requests::RequestDelay;

/// Configures a crawl: which domains may be visited, how fast and how
/// responses are handed to a spider.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Limits the number of requests that are in flight at the same time
    pub max_concurrent_requests: usize,
    /// Delay between two consecutive requests
    pub request_delay: Option<RequestDelay>,
    /// Domain whitelist, if empty any domain is allowed
    pub allowed_domains: HashSet<String>,
    /// Domain blacklist
    pub disallowed_domains: HashSet<String>,
    /// Whether to ignore responses with a non 2xx response code see
    /// `reqwest::Response::is_success`
    pub skip_non_successful_responses: bool,
    /// Whether rule dispatch extracts links at all
    pub follow_links: bool,
    /// Fail if a rule refers to a handler the spider did not register
    pub strict_rules: bool,
    /// Drop requests whose fingerprint was already seen
    pub dedupe_requests: bool,
    pub user_agent: Option<String>,
    /// Timeout of a single request
    pub timeout: Option<Duration>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
            request_delay: None,
            allowed_domains: Default::default(),
            disallowed_domains: Default::default(),
            skip_non_successful_responses: true,
            follow_links: true,
            strict_rules: false,
            dedupe_requests: true,
            user_agent: None,
            timeout: None,
        }
    }
}

impl CrawlerConfig {
    pub fn max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.max_concurrent_requests = max_concurrent_requests.max(1);
        self
    }

    pub fn request_delay(mut self, delay: RequestDelay) -> Self {
        self.request_delay = Some(delay);
        self
    }

    /// Only visit `domain` and its subdomains, together with all other
    /// allowed domains
    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domains.insert(domain.into());
        self
    }

    pub fn allow_domains<I, T>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_domains
            .extend(domains.into_iter().map(Into::into));
        self
    }

    pub fn disallow_domain(mut self, domain: impl Into<String>) -> Self {
        self.disallowed_domains.insert(domain.into());
        self
    }

    pub fn disallow_domains<I, T>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.disallowed_domains
            .extend(domains.into_iter().map(Into::into));
        self
    }

    pub fn skip_non_successful_responses(mut self, skip: bool) -> Self {
        self.skip_non_successful_responses = skip;
        self
    }

    pub fn follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    pub fn strict_rules(mut self, strict_rules: bool) -> Self {
        self.strict_rules = strict_rules;
        self
    }

    pub fn dedupe_requests(mut self, dedupe_requests: bool) -> Self {
        self.dedupe_requests = dedupe_requests;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
