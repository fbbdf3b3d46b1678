//! Declarative crawling rules and their compiled form.

use tracing::warn;

use crate::error::CrawlError;
use crate::link::LinkExtractor;
use crate::requests::Kwargs;
use crate::spider::{
    CallbackFn, ErrbackFn, ProcessLinksFn, ProcessRequestFn, Registry, Spider,
};

/// Refers to a spider handler either by its registered name or directly.
pub enum Hook<F> {
    Named(String),
    Func(F),
}

impl<F: Copy> Hook<F> {
    fn resolve(&self, lookup: impl FnOnce(&str) -> Option<F>) -> Option<F> {
        match self {
            Hook::Named(name) => lookup(name),
            Hook::Func(f) => Some(*f),
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Hook::Named(name) => Some(name),
            Hook::Func(_) => None,
        }
    }
}

impl<F: Copy> Clone for Hook<F> {
    fn clone(&self) -> Self {
        match self {
            Hook::Named(name) => Hook::Named(name.clone()),
            Hook::Func(f) => Hook::Func(*f),
        }
    }
}

/// Which links to follow and what to do with their responses.
pub struct Rule<S: Spider> {
    pub link_extractor: LinkExtractor,
    callback: Option<Hook<CallbackFn<S>>>,
    errback: Option<Hook<ErrbackFn<S>>>,
    cb_kwargs: Kwargs,
    follow: Option<bool>,
    process_links: Option<Hook<ProcessLinksFn<S>>>,
    process_request: Option<Hook<ProcessRequestFn<S>>>,
}

impl<S: Spider> Rule<S> {
    pub fn new(link_extractor: LinkExtractor) -> Self {
        Self {
            link_extractor,
            callback: None,
            errback: None,
            cb_kwargs: Kwargs::new(),
            follow: None,
            process_links: None,
            process_request: None,
        }
    }

    /// Handle matched responses with the callback registered as `name`
    pub fn callback(mut self, name: impl Into<String>) -> Self {
        self.callback = Some(Hook::Named(name.into()));
        self
    }

    pub fn callback_fn(mut self, f: CallbackFn<S>) -> Self {
        self.callback = Some(Hook::Func(f));
        self
    }

    pub fn errback(mut self, name: impl Into<String>) -> Self {
        self.errback = Some(Hook::Named(name.into()));
        self
    }

    pub fn errback_fn(mut self, f: ErrbackFn<S>) -> Self {
        self.errback = Some(Hook::Func(f));
        self
    }

    pub fn cb_kwargs(mut self, cb_kwargs: Kwargs) -> Self {
        self.cb_kwargs = cb_kwargs;
        self
    }

    /// Whether to extract links from matched responses, defaults to `true`
    /// only if no callback is set
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = Some(follow);
        self
    }

    pub fn process_links(mut self, name: impl Into<String>) -> Self {
        self.process_links = Some(Hook::Named(name.into()));
        self
    }

    pub fn process_links_fn(mut self, f: ProcessLinksFn<S>) -> Self {
        self.process_links = Some(Hook::Func(f));
        self
    }

    pub fn process_request(mut self, name: impl Into<String>) -> Self {
        self.process_request = Some(Hook::Named(name.into()));
        self
    }

    pub fn process_request_fn(mut self, f: ProcessRequestFn<S>) -> Self {
        self.process_request = Some(Hook::Func(f));
        self
    }

    /// Name of the callback, if it was given by name
    pub fn callback_name(&self) -> Option<&str> {
        self.callback.as_ref().and_then(Hook::name)
    }

    /// Resolves all hooks against `registry`.
    ///
    /// Hooks that are not registered resolve to `None` unless `strict` is
    /// set, in which case the first missing one is an error.
    pub fn compile(
        &self,
        spider: &str,
        registry: &Registry<S>,
        strict: bool,
    ) -> Result<CompiledRule<S>, CrawlError> {
        let missing = |name: Option<&str>| -> Result<(), CrawlError> {
            let Some(name) = name else { return Ok(()) };
            if strict {
                return Err(CrawlError::UnknownCallback {
                    spider: spider.to_string(),
                    callback: name.to_string(),
                });
            }
            warn!(spider, callback = name, "rule refers to an unregistered handler");
            Ok(())
        };

        let callback = self
            .callback
            .as_ref()
            .and_then(|h| h.resolve(|n| registry.get_callback(n)));
        if callback.is_none() {
            missing(self.callback_name())?;
        }
        let errback = self
            .errback
            .as_ref()
            .and_then(|h| h.resolve(|n| registry.get_errback(n)));
        if errback.is_none() {
            missing(self.errback.as_ref().and_then(Hook::name))?;
        }
        let process_links = self
            .process_links
            .as_ref()
            .and_then(|h| h.resolve(|n| registry.get_process_links(n)));
        if process_links.is_none() {
            missing(self.process_links.as_ref().and_then(Hook::name))?;
        }
        let process_request = self
            .process_request
            .as_ref()
            .and_then(|h| h.resolve(|n| registry.get_process_request(n)));
        if process_request.is_none() {
            missing(self.process_request.as_ref().and_then(Hook::name))?;
        }

        Ok(CompiledRule {
            link_extractor: self.link_extractor.clone(),
            callback,
            callback_name: self.callback_name().map(str::to_string),
            errback,
            cb_kwargs: self.cb_kwargs.clone(),
            follow: self.follow.unwrap_or(self.callback.is_none()),
            process_links,
            process_request,
        })
    }
}

impl<S: Spider> Clone for Rule<S> {
    fn clone(&self) -> Self {
        Self {
            link_extractor: self.link_extractor.clone(),
            callback: self.callback.clone(),
            errback: self.errback.clone(),
            cb_kwargs: self.cb_kwargs.clone(),
            follow: self.follow,
            process_links: self.process_links.clone(),
            process_request: self.process_request.clone(),
        }
    }
}

/// A rule with all hooks resolved against a spider instance.
///
/// Missing `process_links`/`process_request` hooks pass their input
/// through unchanged.
pub struct CompiledRule<S: Spider> {
    pub link_extractor: LinkExtractor,
    pub callback: Option<CallbackFn<S>>,
    /// The name the callback was declared with
    pub callback_name: Option<String>,
    pub errback: Option<ErrbackFn<S>>,
    pub cb_kwargs: Kwargs,
    pub follow: bool,
    pub process_links: Option<ProcessLinksFn<S>>,
    pub process_request: Option<ProcessRequestFn<S>>,
}

/// Compiles the rule table of `spider` in order.
pub fn compile_rules<S: Spider>(
    spider: &S,
    rules: &[Rule<S>],
    registry: &Registry<S>,
    strict: bool,
) -> Result<Vec<CompiledRule<S>>, CrawlError> {
    rules
        .iter()
        .map(|rule| rule.compile(spider.name(), registry, strict))
        .collect()
}
