//! Depth bounded crawling as done by the `parse` command.
//!
//! The driver wraps the callback of a seed request. Whenever a response of
//! a wrapped request arrives, the real callback runs, everything it produced
//! is recorded in a [`DepthLedger`] under the depth of the response, and, as
//! long as the depth budget allows, every produced request is wrapped the
//! same way one level deeper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tracing::{debug, error};

use crate::collector::{Collector, Handler, Stats};
use crate::config::CrawlerConfig;
use crate::crawl::{CrawlDispatcher, Resolved};
use crate::downloader::Downloader;
use crate::error::{CrawlError, Failure};
use crate::ledger::DepthLedger;
use crate::pipeline::Pipelines;
use crate::requests::{Callback, Kwargs, Meta, Request, META_CALLBACK, META_DEPTH};
use crate::response::Response;
use crate::spider::{Output, Produced, Spider};

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Deepest level whose requests are still crawled, the seed is level 1
    pub max_depth: usize,
    /// Callback for responses whose request does not name one
    pub callback: Option<String>,
    /// Pick the callback of the first response from the spider's rules
    pub rules: bool,
    /// Merged into the meta of the seed request
    pub meta: Meta,
    /// Merged into the callback keyword arguments of the seed request
    pub cb_kwargs: Kwargs,
    /// Also fill `meta` and `cb_kwargs` into every deeper request, without
    /// overriding keys the request already has
    pub sticky_extras: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            callback: None,
            rules: false,
            meta: Meta::new(),
            cb_kwargs: Kwargs::new(),
            sticky_extras: false,
        }
    }
}

struct Inner<S: Spider> {
    dispatcher: CrawlDispatcher<S>,
    options: DriverOptions,
    pipelines: Pipelines<S::Item>,
    ledger: Mutex<DepthLedger<S::Item>>,
    /// Whether the next wrapped response is the first one
    first_response: AtomicBool,
}

/// Runs a depth bounded crawl from a single seed request.
///
/// Items are recorded in the ledger instead of being yielded.
pub struct ParseDriver<S: Spider> {
    inner: Arc<Inner<S>>,
}

impl<S: Spider> Clone for ParseDriver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Spider> ParseDriver<S> {
    pub fn new(dispatcher: CrawlDispatcher<S>, options: DriverOptions) -> Self {
        Self::with_pipelines(dispatcher, options, Pipelines::new())
    }

    /// Runs every recorded item through `pipelines` first.
    ///
    /// The ledger keeps the items as the pipelines return them.
    pub fn with_pipelines(
        dispatcher: CrawlDispatcher<S>,
        options: DriverOptions,
        pipelines: Pipelines<S::Item>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                options,
                pipelines,
                ledger: Mutex::new(DepthLedger::new()),
                first_response: AtomicBool::new(true),
            }),
        }
    }

    pub fn dispatcher(&self) -> &CrawlDispatcher<S> {
        &self.inner.dispatcher
    }

    pub fn options(&self) -> &DriverOptions {
        &self.inner.options
    }

    pub fn ledger(&self) -> MutexGuard<'_, DepthLedger<S::Item>> {
        self.inner.ledger.lock()
    }

    /// Takes everything recorded so far, leaving an empty ledger behind
    pub fn take_ledger(&self) -> DepthLedger<S::Item> {
        std::mem::take(&mut *self.inner.ledger.lock())
    }

    /// Applies the seed extras to `request` and wraps it at depth 1.
    pub fn prepare_request(&self, mut request: Request) -> Result<Request> {
        let options = &self.inner.options;
        request.meta.extend(options.meta.clone());
        request.cb_kwargs.extend(options.cb_kwargs.clone());
        wrap(&mut request, 1)?;
        Ok(request)
    }

    /// Crawls `seed` until the depth budget is exhausted or no new requests
    /// turn up.
    ///
    /// Failed branches are logged and do not end the crawl.
    pub async fn crawl(
        &self,
        seed: Request,
        downloader: Arc<dyn Downloader>,
        config: &CrawlerConfig,
    ) -> Result<Stats> {
        let request = self.prepare_request(seed)?;
        let config = config
            .clone()
            .allow_domains(self.dispatcher().spider().allowed_domains());
        let mut collector = Collector::new(self.clone(), downloader, &config);
        collector.crawl(request);
        while let Some(result) = collector.next().await {
            if let Err(err) = result {
                error!("{:#}", err);
            }
        }
        Ok(*collector.stats())
    }

    /// Resolves the callback to run for a wrapped response, `None` if it
    /// can't be resolved.
    fn resolve_callback(&self, response: &Response) -> Option<Resolved<S>> {
        let dispatcher = self.dispatcher();
        let options = self.options();
        let first = self.inner.first_response.swap(false, Ordering::SeqCst);

        let saved = response
            .meta()
            .get(META_CALLBACK)
            .and_then(|value| serde_json::from_value::<Callback>(value.clone()).ok())
            .filter(|callback| *callback != Callback::Default);
        let callback = match (saved, &options.callback) {
            (Some(callback), _) => callback,
            (None, Some(name)) => Callback::named(name.as_str()),
            (None, None) if options.rules && first => {
                return match dispatcher.callback_from_rules(response) {
                    Ok(resolved) => Some(resolved),
                    Err(err) => {
                        error!("{}", err);
                        None
                    }
                };
            }
            (None, None) => Callback::named("parse"),
        };

        let resolved = dispatcher.resolve(&callback);
        if resolved.is_none() {
            let name = match &callback {
                Callback::Named(name) => name.clone(),
                other => format!("{:?}", other),
            };
            error!(
                "{}",
                CrawlError::UnknownCallback {
                    spider: dispatcher.name().to_string(),
                    callback: name,
                }
            );
        }
        resolved
    }

    /// Records what a callback produced at `depth` and returns the requests
    /// to crawl next.
    fn record(&self, depth: usize, outputs: Vec<Output<S::Item>>) -> Result<Vec<Output<S::Item>>> {
        let inner = &self.inner;
        let mut items = Vec::new();
        let mut requests = Vec::new();
        for output in outputs {
            match output {
                Output::Item(item) => items.push(item),
                Output::Request(request) => requests.push(request),
            }
        }

        if !inner.pipelines.is_empty() {
            let spider = inner.dispatcher.name();
            items = items
                .into_iter()
                .map(|item| inner.pipelines.process(item, spider))
                .collect::<Result<_>>()?;
        }

        debug!(
            depth,
            items = items.len(),
            requests = requests.len(),
            "recorded callback results"
        );
        {
            let mut ledger = inner.ledger.lock();
            ledger.add_items(depth, items);
            ledger.add_requests(depth, requests.iter().cloned());
        }

        if depth >= inner.options.max_depth {
            return Ok(Vec::new());
        }
        requests
            .into_iter()
            .map(|mut request| -> Result<Output<S::Item>> {
                if inner.options.sticky_extras {
                    fill_missing(&mut request.meta, &inner.options.meta);
                    fill_missing(&mut request.cb_kwargs, &inner.options.cb_kwargs);
                }
                wrap(&mut request, depth + 1)?;
                Ok(Output::Request(request))
            })
            .collect()
    }
}

/// Saves the callback of `request` and replaces it with the driver's.
fn wrap(request: &mut Request, depth: usize) -> Result<()> {
    request.meta.insert(META_DEPTH.to_string(), Value::from(depth));
    request.meta.insert(
        META_CALLBACK.to_string(),
        serde_json::to_value(&request.callback)?,
    );
    request.callback = Callback::Trampoline;
    Ok(())
}

fn fill_missing(target: &mut serde_json::Map<String, Value>, extras: &serde_json::Map<String, Value>) {
    for (key, value) in extras {
        target
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

impl<S: Spider> Handler for ParseDriver<S> {
    type Item = S::Item;

    fn handle(&self, response: Response) -> Result<Produced<S::Item>> {
        if response.request.callback != Callback::Trampoline {
            return self.dispatcher().handle(response);
        }
        let depth = response.request.depth().unwrap_or(1);
        let Some(callback) = self.resolve_callback(&response) else {
            return Ok(Produced::empty());
        };
        let kwargs = response.request.cb_kwargs.clone();
        let produced = self.dispatcher().call(callback, response, kwargs)?;

        let driver = self.clone();
        Ok(Produced::from_future(async move {
            let outputs = produced.collect().await?;
            driver.record(depth, outputs)
        }))
    }

    fn handle_failure(&self, failure: Failure) -> Result<Produced<S::Item>> {
        self.dispatcher().handle_failure(failure)
    }
}
