use futures::Future;
use futures_timer::Delay;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Arbitrary metadata travelling with a request, see [`Request::meta`]
pub type Meta = serde_json::Map<String, Value>;

/// Keyword arguments handed to a callback alongside the response
pub type Kwargs = serde_json::Map<String, Value>;

/// Meta key under which the rule dispatcher stores the index of the rule
/// that produced a request.
pub const META_RULE: &str = "rule";
/// Meta key holding the anchor text of the link a request was built from.
pub const META_LINK_TEXT: &str = "link_text";
/// Meta key holding the depth of a request inside a depth bounded crawl.
pub const META_DEPTH: &str = "_depth";
/// Meta key holding the callback a trampoline stands in for.
pub const META_CALLBACK: &str = "_callback";

/// Which handler receives the response of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    /// The spider's default: rule dispatch for spiders with rules, `parse`
    /// otherwise
    #[default]
    Default,
    /// A handler registered under this name
    Named(String),
    /// The rule dispatcher's own handler, which looks up the rule by the
    /// index stored under [`META_RULE`]
    Rule,
    /// A depth driver's wrapper; the callback it replaced is stored under
    /// [`META_CALLBACK`]
    Trampoline,
}

impl Callback {
    pub fn named(name: impl Into<String>) -> Self {
        Callback::Named(name.into())
    }
}

/// Which handler receives the failure of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Errback {
    Named(String),
    /// Routed to the error handler of the rule stored under [`META_RULE`]
    Rule,
}

/// A unit of fetch work.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub callback: Callback,
    pub errback: Option<Errback>,
    pub meta: Meta,
    pub cb_kwargs: Kwargs,
    /// Bypass duplicate filtering in the collector
    pub dont_filter: bool,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            callback: Callback::Default,
            errback: None,
            meta: Meta::new(),
            cb_kwargs: Kwargs::new(),
            dont_filter: false,
        }
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callback = callback;
        self
    }

    pub fn errback(mut self, errback: Errback) -> Self {
        self.errback = Some(errback);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn cb_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cb_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    /// The rule index set by the rule dispatcher, if any
    pub fn rule_index(&self) -> Option<usize> {
        self.meta
            .get(META_RULE)
            .and_then(Value::as_u64)
            .map(|idx| idx as usize)
    }

    /// The depth set by a depth driver, if any
    pub fn depth(&self) -> Option<usize> {
        self.meta
            .get(META_DEPTH)
            .and_then(Value::as_u64)
            .map(|depth| depth as usize)
    }

    /// Key used for duplicate detection
    pub fn fingerprint(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.method, self.url)
    }
}

/// A queue of requests that are waiting to be sent, optionally spaced out
/// by a delay.
pub struct RequestQueue {
    delay: Option<(Delay, RequestDelay)>,
    queued_requests: VecDeque<Request>,
}

impl RequestQueue {
    pub fn with_delay(delay: RequestDelay) -> Self {
        Self {
            delay: Some((Delay::new(Duration::default()), delay)),
            queued_requests: Default::default(),
        }
    }

    pub fn push(&mut self, request: Request) {
        self.queued_requests.push_back(request)
    }

    /// Pops the next request once the delay since the previous one elapsed.
    ///
    /// Returns `Poll::Ready(None)` if the queue is empty.
    pub fn poll_next_request(&mut self, cx: &mut Context<'_>) -> Poll<Option<Request>> {
        if self.queued_requests.is_empty() {
            return Poll::Ready(None);
        }
        if let Some((delay, dur)) = self.delay.as_mut() {
            if Pin::new(&mut *delay).poll(cx).is_pending() {
                return Poll::Pending;
            }
            delay.reset(dur.next_delay());
        }
        Poll::Ready(self.queued_requests.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.queued_requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queued_requests.len()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self {
            delay: None,
            queued_requests: Default::default(),
        }
    }
}

/// How to delay a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDelay {
    /// Apply a fixed delay to request
    Fixed(Duration),
    /// Apply a random delay to a request that is in the range of (`min`..`max`)
    Random {
        /// minimum delay duration to apply
        min: Duration,
        /// maximum delay duration to apply
        max: Duration,
    },
}

impl RequestDelay {
    /// Use a fixed delay
    pub fn fixed(delay: Duration) -> Self {
        RequestDelay::Fixed(delay)
    }

    /// Use a random delay of range `0`..max`
    pub fn random(max: Duration) -> Self {
        RequestDelay::Random {
            min: Duration::from_millis(0),
            max,
        }
    }

    /// Use a random delay of range `min`..max`, the bounds may come in
    /// either order
    pub fn random_in_range(min: Duration, max: Duration) -> Self {
        RequestDelay::Random {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn next_delay(&self) -> Duration {
        use rand::Rng;

        match self {
            RequestDelay::Fixed(delay) => *delay,
            RequestDelay::Random { min, max } => {
                let (min, max) = (min.as_millis() as u64, max.as_millis() as u64);
                Duration::from_millis(rand::thread_rng().gen_range(min.min(max)..=min.max(max)))
            }
        }
    }
}
