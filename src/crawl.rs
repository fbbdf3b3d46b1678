//! Rule based dispatch of responses.
//!
//! A [`CrawlDispatcher`] owns a spider together with its compiled rule
//! table. Every response is routed to the handler its request names;
//! requests built from extracted links point back at the dispatcher itself
//! and carry the index of the rule that extracted them, so the right rule
//! callback runs once their response arrives.

use anyhow::Result;
use futures::{future, stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::collector::Handler;
use crate::config::CrawlerConfig;
use crate::error::{CrawlError, Failure};
use crate::link::Link;
use crate::requests::{Callback, Errback, Kwargs, Request, META_LINK_TEXT, META_RULE};
use crate::response::Response;
use crate::rules::{compile_rules, CompiledRule};
use crate::spider::{CallbackFn, ErrbackFn, Output, Produced, Registry, Spider};

/// A request callback resolved against the spider.
pub enum Resolved<S: Spider> {
    /// The spider's default callback
    Default,
    /// The dispatcher's rule handler
    Rule,
    Method(CallbackFn<S>),
}

impl<S: Spider> Clone for Resolved<S> {
    fn clone(&self) -> Self {
        match self {
            Resolved::Default => Resolved::Default,
            Resolved::Rule => Resolved::Rule,
            Resolved::Method(f) => Resolved::Method(*f),
        }
    }
}

struct Inner<S: Spider> {
    spider: S,
    registry: Registry<S>,
    rules: Option<Vec<CompiledRule<S>>>,
    follow_links: bool,
}

/// Turns responses into items and follow up requests for a spider.
pub struct CrawlDispatcher<S: Spider> {
    inner: Arc<Inner<S>>,
}

impl<S: Spider> Clone for CrawlDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Spider> CrawlDispatcher<S> {
    /// Builds the registry of `spider` and compiles its rules, once.
    pub fn new(spider: S, config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let registry = spider.registry();
        let rules = match spider.rules() {
            Some(rules) => Some(compile_rules(
                &spider,
                &rules,
                &registry,
                config.strict_rules,
            )?),
            None => None,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                spider,
                registry,
                rules,
                follow_links: config.follow_links,
            }),
        })
    }

    pub fn spider(&self) -> &S {
        &self.inner.spider
    }

    pub fn name(&self) -> &str {
        self.inner.spider.name()
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.inner.registry
    }

    /// The compiled rule table, `None` if the spider has no rules
    pub fn rules(&self) -> Option<&[CompiledRule<S>]> {
        self.inner.rules.as_deref()
    }

    /// Runs the handler for a response of a rule generated request, or the
    /// start handler if the request was not generated by a rule.
    pub fn dispatch(&self, response: Response) -> Result<Produced<S::Item>> {
        let kwargs = response.request.cb_kwargs.clone();
        if response.request.rule_index().is_some() {
            self.rule_callback(response, kwargs)
        } else {
            self.parse(response, kwargs)
        }
    }

    /// The default callback.
    ///
    /// With rules this hands the response to `parse_start_url` and follows
    /// the links of every rule.
    pub fn parse(&self, response: Response, kwargs: Kwargs) -> Result<Produced<S::Item>> {
        if self.rules().is_some() {
            self.parse_response(
                response,
                Some(<S as Spider>::parse_start_url),
                kwargs,
                true,
                None,
            )
        } else {
            self.inner.spider.parse(response, kwargs)
        }
    }

    /// Handles a response to a request built by [`Self::requests_to_follow`].
    ///
    /// Keyword arguments of the rule are overridden by `kwargs`.
    pub fn rule_callback(&self, response: Response, kwargs: Kwargs) -> Result<Produced<S::Item>> {
        let rule = self.rule_for(&response.request)?;
        let mut cb_kwargs = rule.cb_kwargs.clone();
        cb_kwargs.extend(kwargs);
        self.parse_response(response, rule.callback, cb_kwargs, rule.follow, rule.errback)
    }

    /// Handles a failure of a request built by [`Self::requests_to_follow`].
    pub fn rule_errback(&self, failure: Failure) -> Result<Produced<S::Item>> {
        let rule = self.rule_for(&failure.request)?;
        match rule.errback {
            Some(errback) => errback(&self.inner.spider, failure),
            None => Err(failure.error),
        }
    }

    fn rule_for(&self, request: &Request) -> Result<&CompiledRule<S>, CrawlError> {
        let rules = self.rules().unwrap_or_default();
        let index = request.rule_index().unwrap_or(usize::MAX);
        rules.get(index).ok_or_else(|| CrawlError::UnknownRule {
            spider: self.name().to_string(),
            index,
            len: rules.len(),
            request: Box::new(request.clone()),
        })
    }

    fn parse_response(
        &self,
        response: Response,
        callback: Option<CallbackFn<S>>,
        kwargs: Kwargs,
        follow: bool,
        errback: Option<ErrbackFn<S>>,
    ) -> Result<Produced<S::Item>> {
        let spider = &self.inner.spider;
        let follow_requests = if follow && self.inner.follow_links {
            self.requests_to_follow(&response)
                .into_iter()
                .map(Output::Request)
                .collect()
        } else {
            Vec::new()
        };

        let results = match callback {
            Some(callback) => {
                let request = response.request.clone();
                let hook_response = response.clone();
                match callback(spider, response, kwargs) {
                    Ok(results) => {
                        let results = match errback {
                            Some(errback) => self.recover_with(results, request, errback),
                            None => results,
                        };
                        spider.process_results(&hook_response, results)
                    }
                    Err(err) => match errback {
                        Some(errback) => {
                            debug!(url = %request.url, error = %err, "callback failed, calling errback");
                            errback(spider, Failure::new(request, err))?
                        }
                        None => return Err(err),
                    },
                }
            }
            None => Produced::empty(),
        };

        Ok(results.chain(follow_requests))
    }

    /// Hands the first error of a streaming result to `errback`.
    ///
    /// Everything yielded before the error is kept, the stream ends with
    /// the errback's results.
    fn recover_with(
        &self,
        results: Produced<S::Item>,
        request: Request,
        errback: ErrbackFn<S>,
    ) -> Produced<S::Item> {
        let results = match results {
            Produced::Stream(results) => results,
            ready => return ready,
        };
        let dispatcher = self.clone();
        let mut failed = false;
        Produced::from_stream(
            results
                .take_while(move |result| {
                    let more = !failed;
                    failed |= result.is_err();
                    future::ready(more)
                })
                .flat_map(move |result| match result {
                    Ok(output) => stream::once(future::ready(Ok(output))).boxed(),
                    Err(err) => {
                        debug!(url = %request.url, error = %err, "callback failed, calling errback");
                        match errback(dispatcher.spider(), Failure::new(request.clone(), err)) {
                            Ok(recovered) => recovered.into_stream(),
                            Err(err) => stream::once(future::ready(Err(err))).boxed(),
                        }
                    }
                }),
        )
    }

    /// Builds the requests for all links the rules extract from `response`.
    ///
    /// Every link is offered to the first rule that extracts it only.
    pub fn requests_to_follow(&self, response: &Response) -> Vec<Request> {
        let Some(rules) = self.rules() else {
            return Vec::new();
        };
        if !response.is_html() {
            return Vec::new();
        }
        let spider = &self.inner.spider;
        let mut seen = HashSet::new();
        let mut requests = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            let links: Vec<Link> = rule
                .link_extractor
                .extract_links(response)
                .into_iter()
                .filter(|link| !seen.contains(link))
                .collect();
            let links = match rule.process_links {
                Some(process_links) => process_links(spider, links),
                None => links,
            };
            for link in links {
                let request = build_request(index, &link);
                seen.insert(link);
                let request = match rule.process_request {
                    Some(process_request) => process_request(spider, request, response),
                    None => Some(request),
                };
                match request {
                    Some(request) => requests.push(request),
                    None => trace!(rule = index, "process_request dropped a request"),
                }
            }
        }
        requests
    }

    /// Resolves the callback a request names.
    pub fn resolve(&self, callback: &Callback) -> Option<Resolved<S>> {
        match callback {
            Callback::Default => Some(Resolved::Default),
            Callback::Named(name) => match self.inner.registry.get_callback(name) {
                Some(f) => Some(Resolved::Method(f)),
                None if name == "parse" => Some(Resolved::Default),
                None => None,
            },
            Callback::Rule => self.rules().map(|_| Resolved::Rule),
            Callback::Trampoline => None,
        }
    }

    pub fn call(
        &self,
        callback: Resolved<S>,
        response: Response,
        kwargs: Kwargs,
    ) -> Result<Produced<S::Item>> {
        match callback {
            Resolved::Default => self.parse(response, kwargs),
            Resolved::Rule => self.rule_callback(response, kwargs),
            Resolved::Method(f) => f(&self.inner.spider, response, kwargs),
        }
    }

    /// The callback of the first rule whose extractor matches `response`.
    ///
    /// A matching rule without callback resolves to `parse`.
    pub fn callback_from_rules(&self, response: &Response) -> Result<Resolved<S>, CrawlError> {
        let rules = self.rules().ok_or_else(|| CrawlError::NoRules {
            spider: self.name().to_string(),
        })?;
        let rule = rules
            .iter()
            .find(|rule| rule.link_extractor.matches(response.url()))
            .ok_or_else(|| CrawlError::NoRuleMatch {
                spider: self.name().to_string(),
                url: response.url().clone(),
            })?;
        match (rule.callback, &rule.callback_name) {
            (Some(callback), _) => Ok(Resolved::Method(callback)),
            (None, Some(name)) => self
                .resolve(&Callback::Named(name.clone()))
                .ok_or_else(|| CrawlError::UnknownCallback {
                    spider: self.name().to_string(),
                    callback: name.clone(),
                }),
            (None, None) => Ok(Resolved::Default),
        }
    }
}

fn build_request(rule: usize, link: &Link) -> Request {
    Request::new(link.url.clone())
        .callback(Callback::Rule)
        .errback(Errback::Rule)
        .meta(META_RULE, rule)
        .meta(META_LINK_TEXT, link.text.clone())
}

impl<S: Spider> Handler for CrawlDispatcher<S> {
    type Item = S::Item;

    fn handle(&self, response: Response) -> Result<Produced<S::Item>> {
        let Some(callback) = self.resolve(&response.request.callback) else {
            return Err(CrawlError::UnknownCallback {
                spider: self.name().to_string(),
                callback: format!("{:?}", response.request.callback),
            }
            .into());
        };
        let kwargs = response.request.cb_kwargs.clone();
        self.call(callback, response, kwargs)
    }

    fn handle_failure(&self, failure: Failure) -> Result<Produced<S::Item>> {
        match failure.request.errback.clone() {
            Some(Errback::Rule) => self.rule_errback(failure),
            Some(Errback::Named(name)) => match self.inner.registry.get_errback(&name) {
                Some(errback) => errback(&self.inner.spider, failure),
                None => Err(CrawlError::UnknownCallback {
                    spider: self.name().to_string(),
                    callback: name,
                }
                .into()),
            },
            None => Err(failure.error),
        }
    }
}
