//! The spider contract: named callbacks, optional rules and the normalized
//! shape of everything a callback produces.

use anyhow::Result;
use futures::future::Future;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::Url;
use std::collections::HashMap;
use std::fmt;

use crate::error::Failure;
use crate::link::Link;
use crate::requests::{Kwargs, Request};
use crate::response::Response;
use crate::rules::Rule;

/// Something a callback produced: either a terminal item or a request to
/// continue crawling.
#[derive(Debug)]
pub enum Output<I> {
    Item(I),
    Request(Request),
}

impl<I> Output<I> {
    pub fn is_request(&self) -> bool {
        matches!(self, Output::Request(_))
    }
}

impl<I> From<Request> for Output<I> {
    fn from(request: Request) -> Self {
        Output::Request(request)
    }
}

/// The normalized result of a callback.
///
/// Results that are available right away are kept in a `Vec`; everything
/// that needs to be awaited is a stream. Consumers only suspend on the
/// latter.
pub enum Produced<I> {
    Ready(Vec<Output<I>>),
    Stream(BoxStream<'static, Result<Output<I>>>),
}

impl<I: Send + 'static> Produced<I> {
    pub fn empty() -> Self {
        Produced::Ready(Vec::new())
    }

    pub fn item(item: I) -> Self {
        Produced::Ready(vec![Output::Item(item)])
    }

    /// Results produced by an async generator
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Output<I>>> + Send + 'static,
    {
        Produced::Stream(stream.boxed())
    }

    /// Results that become available once `fut` resolves
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Vec<Output<I>>>> + Send + 'static,
    {
        Produced::Stream(
            stream::once(fut)
                .map_ok(|outputs| stream::iter(outputs.into_iter().map(Ok::<_, anyhow::Error>)))
                .try_flatten()
                .boxed(),
        )
    }

    /// Appends `outputs` after everything this already produces
    pub fn chain(self, outputs: Vec<Output<I>>) -> Self {
        if outputs.is_empty() {
            return self;
        }
        match self {
            Produced::Ready(mut ready) => {
                ready.extend(outputs);
                Produced::Ready(ready)
            }
            Produced::Stream(s) => {
                Produced::Stream(s.chain(stream::iter(outputs.into_iter().map(Ok))).boxed())
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Output<I>>> {
        match self {
            Produced::Ready(ready) => stream::iter(ready.into_iter().map(Ok)).boxed(),
            Produced::Stream(s) => s,
        }
    }

    /// Drains all results in order, stopping at the first error.
    pub async fn collect(self) -> Result<Vec<Output<I>>> {
        match self {
            Produced::Ready(ready) => Ok(ready),
            Produced::Stream(s) => s.try_collect().await,
        }
    }
}

impl<I> From<Vec<Output<I>>> for Produced<I> {
    fn from(outputs: Vec<Output<I>>) -> Self {
        Produced::Ready(outputs)
    }
}

impl<I> FromIterator<Output<I>> for Produced<I> {
    fn from_iter<T: IntoIterator<Item = Output<I>>>(iter: T) -> Self {
        Produced::Ready(iter.into_iter().collect())
    }
}

impl<I> fmt::Debug for Produced<I>
where
    I: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Produced::Ready(ready) => f.debug_tuple("Ready").field(ready).finish(),
            Produced::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Handles a response.
pub type CallbackFn<S> = fn(&S, Response, Kwargs) -> Result<Produced<<S as Spider>::Item>>;
/// Handles a failed request.
pub type ErrbackFn<S> = fn(&S, Failure) -> Result<Produced<<S as Spider>::Item>>;
/// Post-processes the links a rule extracted.
pub type ProcessLinksFn<S> = fn(&S, Vec<Link>) -> Vec<Link>;
/// Post-processes a request built by a rule, `None` drops it.
pub type ProcessRequestFn<S> = fn(&S, Request, &Response) -> Option<Request>;

/// The named handlers of a spider.
///
/// Built once per spider instance; rules and requests refer to handlers by
/// the names registered here.
pub struct Registry<S: Spider> {
    callbacks: HashMap<String, CallbackFn<S>>,
    errbacks: HashMap<String, ErrbackFn<S>>,
    process_links: HashMap<String, ProcessLinksFn<S>>,
    process_request: HashMap<String, ProcessRequestFn<S>>,
}

impl<S: Spider> Registry<S> {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            errbacks: HashMap::new(),
            process_links: HashMap::new(),
            process_request: HashMap::new(),
        }
    }

    pub fn callback(mut self, name: impl Into<String>, f: CallbackFn<S>) -> Self {
        self.callbacks.insert(name.into(), f);
        self
    }

    pub fn errback(mut self, name: impl Into<String>, f: ErrbackFn<S>) -> Self {
        self.errbacks.insert(name.into(), f);
        self
    }

    pub fn process_links(mut self, name: impl Into<String>, f: ProcessLinksFn<S>) -> Self {
        self.process_links.insert(name.into(), f);
        self
    }

    pub fn process_request(mut self, name: impl Into<String>, f: ProcessRequestFn<S>) -> Self {
        self.process_request.insert(name.into(), f);
        self
    }

    pub fn get_callback(&self, name: &str) -> Option<CallbackFn<S>> {
        self.callbacks.get(name).copied()
    }

    pub fn get_errback(&self, name: &str) -> Option<ErrbackFn<S>> {
        self.errbacks.get(name).copied()
    }

    pub fn get_process_links(&self, name: &str) -> Option<ProcessLinksFn<S>> {
        self.process_links.get(name).copied()
    }

    pub fn get_process_request(&self, name: &str) -> Option<ProcessRequestFn<S>> {
        self.process_request.get(name).copied()
    }
}

impl<S: Spider> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A trait that takes in fetched responses, scrapes the valuable content
/// from them and provides further requests to visit.
///
/// Handlers other than [`Spider::parse`] are plain functions registered by
/// name in [`Spider::registry`]. A spider that returns `Some` from
/// [`Spider::rules`] crawls by rules: its default callback runs
/// [`Spider::parse_start_url`] and follows the links the rules extract.
pub trait Spider: Send + Sync + Sized + 'static {
    /// The type this spider eventually produces
    type Item: fmt::Debug + Send + 'static;

    fn name(&self) -> &str;

    /// Hosts (and their subdomains) this spider may visit, empty allows all
    fn allowed_domains(&self) -> Vec<String> {
        Vec::new()
    }

    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    fn start_requests(&self) -> Result<Vec<Request>> {
        self.start_urls()
            .iter()
            .map(|url| Url::parse(url).map(Request::new).map_err(Into::into))
            .collect()
    }

    /// Named callbacks, errbacks and link/request processors
    fn registry(&self) -> Registry<Self> {
        Registry::new()
    }

    /// Crawling rules, `None` if this spider does not crawl by rules
    fn rules(&self) -> Option<Vec<Rule<Self>>> {
        None
    }

    /// The default callback for spiders without rules
    fn parse(&self, _response: Response, _kwargs: Kwargs) -> Result<Produced<Self::Item>> {
        Ok(Produced::empty())
    }

    /// Called for the start responses of a spider with rules
    fn parse_start_url(
        &self,
        _response: Response,
        _kwargs: Kwargs,
    ) -> Result<Produced<Self::Item>> {
        Ok(Produced::empty())
    }

    /// Hook over the results of every rule callback
    fn process_results(
        &self,
        _response: &Response,
        results: Produced<Self::Item>,
    ) -> Produced<Self::Item> {
        results
    }

    /// Whether `url` belongs to this spider, by allowed domains or name
    fn handles_url(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        let mut domains = self.allowed_domains();
        domains.push(self.name().to_string());
        crate::link::host_in_domains(host, &domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u32) -> Output<u32> {
        Output::Item(n)
    }

    fn values(outputs: Vec<Output<u32>>) -> Vec<u32> {
        outputs
            .into_iter()
            .filter_map(|o| match o {
                Output::Item(n) => Some(n),
                Output::Request(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn ready_and_stream_collect_in_order() {
        let ready: Produced<u32> = vec![item(1), item(2)].into();
        assert_eq!(values(ready.collect().await.unwrap()), vec![1, 2]);

        let streamed = Produced::from_stream(stream::iter(vec![Ok(item(3)), Ok(item(4))]));
        assert_eq!(values(streamed.collect().await.unwrap()), vec![3, 4]);
    }

    #[tokio::test]
    async fn future_results_are_awaited() {
        let produced = Produced::from_future(async {
            tokio::task::yield_now().await;
            Ok(vec![item(7), item(8)])
        });
        let produced = produced.chain(vec![item(9)]);
        assert_eq!(values(produced.collect().await.unwrap()), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn stream_error_stops_collection() {
        let produced: Produced<u32> = Produced::from_stream(stream::iter(vec![
            Ok(item(1)),
            Err(anyhow::anyhow!("boom")),
            Ok(item(2)),
        ]));
        assert!(produced.collect().await.is_err());
    }
}
