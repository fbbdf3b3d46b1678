use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Result;
use futures::stream::{BoxStream, Stream};
use futures::{Future, FutureExt, StreamExt};
use tracing::{debug, trace};

use crate::config::CrawlerConfig;
use crate::domain::DomainFilter;
use crate::downloader::Downloader;
use crate::error::Failure;
use crate::requests::{Request, RequestQueue};
use crate::response::Response;
use crate::spider::{Output, Produced};

/// Receives every fetched response and every failed request of a
/// [`Collector`].
pub trait Handler: Send + Sync + 'static {
    /// The type this handler eventually produces
    type Item: Send + 'static;

    fn handle(&self, response: Response) -> Result<Produced<Self::Item>>;

    fn handle_failure(&self, failure: Failure) -> Result<Produced<Self::Item>>;
}

impl<H: Handler> Handler for Arc<H> {
    type Item = H::Item;

    fn handle(&self, response: Response) -> Result<Produced<Self::Item>> {
        (**self).handle(response)
    }

    fn handle_failure(&self, failure: Failure) -> Result<Produced<Self::Item>> {
        (**self).handle_failure(failure)
    }
}

/// Stats about sent requests and received responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// number of sent requests
    pub request_count: usize,
    /// number of received responses
    pub success_count: usize,
    /// failed downloads and failed callbacks
    pub error_count: usize,
    /// number of produced items
    pub item_count: usize,
    /// requests dropped as duplicates or because of their domain
    pub filtered_count: usize,
}

/// Whether the download succeeded and what the handler made of it
type CrawlRequest<I> = Pin<Box<dyn Future<Output = (bool, Result<Produced<I>>)> + Send>>;

/// Drives requests to completion and passes their responses to a
/// [`Handler`]. Requests the handler produces are crawled as well, items are
/// yielded.
pub struct Collector<H: Handler> {
    handler: Arc<H>,
    downloader: Arc<dyn Downloader>,
    /// Requests that are currently waiting to be executed
    request_queue: RequestQueue,
    /// Futures that eventually return the handler's results for a response
    in_progress_crawl_requests: Vec<CrawlRequest<H::Item>>,
    /// Results of handled responses that are not yet exhausted
    running_outputs: Vec<BoxStream<'static, Result<Output<H::Item>>>>,
    /// polling them all consecutively and buffering all the results prevents
    /// bias
    queued_results: VecDeque<Result<H::Item>>,
    /// Fingerprints of all requests that were queued
    seen: HashSet<String>,
    domains: DomainFilter,
    dedupe_requests: bool,
    /// Number of concurrent requests
    max_requests: usize,
    stats: Stats,
}

impl<H: Handler> Collector<H> {
    pub fn new(handler: H, downloader: Arc<dyn Downloader>, config: &CrawlerConfig) -> Self {
        Self::with_handler(Arc::new(handler), downloader, config)
    }

    pub fn with_handler(
        handler: Arc<H>,
        downloader: Arc<dyn Downloader>,
        config: &CrawlerConfig,
    ) -> Self {
        Self {
            handler,
            downloader,
            request_queue: config
                .request_delay
                .map(RequestQueue::with_delay)
                .unwrap_or_default(),
            in_progress_crawl_requests: Vec::new(),
            running_outputs: Vec::new(),
            queued_results: VecDeque::new(),
            seen: HashSet::new(),
            domains: DomainFilter::new(&config.allowed_domains, &config.disallowed_domains),
            dedupe_requests: config.dedupe_requests,
            max_requests: config.max_concurrent_requests.max(1),
            stats: Stats::default(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Queues in a request, unless it is a duplicate or its domain is not
    /// admitted.
    ///
    /// Returns whether the request was queued.
    pub fn crawl(&mut self, request: Request) -> bool {
        if self.dedupe_requests && !request.dont_filter && !self.seen.insert(request.fingerprint())
        {
            trace!(url = %request.url, "filtered duplicate request");
            self.stats.filtered_count += 1;
            return false;
        }
        match self.domains.check(request) {
            Ok(request) => {
                self.request_queue.push(request);
                true
            }
            Err(err) => {
                debug!("{}", err);
                self.stats.filtered_count += 1;
                false
            }
        }
    }

    fn start_request(&mut self, request: Request) {
        self.stats.request_count += 1;
        let handler = Arc::clone(&self.handler);
        let fut = self.downloader.fetch(request.clone());
        self.in_progress_crawl_requests.push(Box::pin(async move {
            match fut.await {
                Ok(response) => (true, handler.handle(response)),
                Err(error) => {
                    debug!(url = %request.url, error = %error, "request failed");
                    (false, handler.handle_failure(Failure::new(request, error)))
                }
            }
        }));
    }

    fn is_done(&self) -> bool {
        self.queued_results.is_empty()
            && self.request_queue.is_empty()
            && self.in_progress_crawl_requests.is_empty()
            && self.running_outputs.is_empty()
    }
}

impl<H: Handler> Unpin for Collector<H> {}

impl<H: Handler> Stream for Collector<H> {
    type Item = Result<H::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if let Some(res) = pin.queued_results.pop_front() {
                return Poll::Ready(Some(res));
            }

            while pin.in_progress_crawl_requests.len() < pin.max_requests {
                match pin.request_queue.poll_next_request(cx) {
                    Poll::Ready(Some(request)) => pin.start_request(request),
                    _ => break,
                }
            }

            // advance all http requests
            for n in (0..pin.in_progress_crawl_requests.len()).rev() {
                let mut request = pin.in_progress_crawl_requests.swap_remove(n);
                if let Poll::Ready((fetched, result)) = request.poll_unpin(cx) {
                    if fetched {
                        pin.stats.success_count += 1;
                    } else {
                        pin.stats.error_count += 1;
                    }
                    match result {
                        Ok(produced) => pin.running_outputs.push(produced.into_stream()),
                        Err(err) => {
                            if fetched {
                                pin.stats.error_count += 1;
                            }
                            pin.queued_results.push_back(Err(err));
                        }
                    }
                } else {
                    pin.in_progress_crawl_requests.push(request);
                }
            }

            // drain the results of handled responses
            let mut queued_requests = false;
            for n in (0..pin.running_outputs.len()).rev() {
                let mut outputs = pin.running_outputs.swap_remove(n);
                let mut exhausted = false;
                loop {
                    match outputs.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(Output::Item(item)))) => {
                            pin.stats.item_count += 1;
                            pin.queued_results.push_back(Ok(item));
                        }
                        Poll::Ready(Some(Ok(Output::Request(request)))) => {
                            queued_requests |= pin.crawl(request);
                        }
                        Poll::Ready(Some(Err(err))) => {
                            pin.stats.error_count += 1;
                            pin.queued_results.push_back(Err(err));
                            exhausted = true;
                            break;
                        }
                        Poll::Ready(None) => {
                            exhausted = true;
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
                if !exhausted {
                    pin.running_outputs.push(outputs);
                }
            }

            if pin.is_done() {
                return Poll::Ready(None);
            }
            if pin.queued_results.is_empty() && !queued_requests {
                return Poll::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::MemoryDownloader;
    use futures::TryStreamExt;

    /// Yields the path of every page and follows all hrefs
    struct Paths;

    impl Handler for Paths {
        type Item = String;

        fn handle(&self, response: Response) -> Result<Produced<String>> {
            let mut outputs = vec![Output::Item(response.url().path().to_string())];
            let html = response.html();
            let selector = scraper::Selector::parse("a[href]").unwrap();
            for href in html
                .select(&selector)
                .filter_map(|el| el.value().attr("href"))
            {
                outputs.push(Output::Request(response.follow(href)?));
            }
            Ok(outputs.into())
        }

        fn handle_failure(&self, failure: Failure) -> Result<Produced<String>> {
            Ok(Produced::item(format!("failed {}", failure.request.url.path())))
        }
    }

    fn site() -> Arc<dyn Downloader> {
        Arc::new(
            MemoryDownloader::new()
                .page(
                    "http://example.com/",
                    r#"<a href="/a">a</a><a href="/b">b</a><a href="http://other.com/">x</a>"#,
                )
                .page("http://example.com/a", r#"<a href="/">home</a><a href="/b">b</a>"#),
        )
    }

    #[tokio::test]
    async fn crawls_until_exhausted() {
        let config = CrawlerConfig::default().allow_domain("example.com");
        let mut collector = Collector::new(Paths, site(), &config);
        collector.crawl(Request::new("http://example.com/".parse().unwrap()));

        let mut paths: Vec<String> = (&mut collector).try_collect().await.unwrap();
        paths.sort();
        assert_eq!(paths, vec!["/", "/a", "failed /b"]);

        let stats = *collector.stats();
        assert_eq!(stats.request_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.item_count, 3);
        // offsite link, `/` and `/b` again
        assert_eq!(stats.filtered_count, 3);
    }

    #[tokio::test]
    async fn dont_filter_bypasses_dedupe() {
        let mut collector = Collector::new(Paths, site(), &CrawlerConfig::default());
        let seed = Request::new("http://example.com/a".parse().unwrap());
        assert!(collector.crawl(seed.clone()));
        assert!(!collector.crawl(seed.clone()));
        assert!(collector.crawl(seed.dont_filter(true)));
    }
}
