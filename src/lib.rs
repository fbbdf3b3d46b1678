//! Rule driven crawling with named spider callbacks, and a depth bounded
//! driver that records what a spider scrapes on every level.
//!
//! A [`Spider`] registers its handlers by name and optionally declares
//! [`Rule`]s. The [`CrawlDispatcher`] routes responses to those handlers and
//! turns the links the rules extract into follow up requests. The
//! [`ParseDriver`] runs a crawl from one seed up to a maximum depth and
//! keeps the results in a [`DepthLedger`].

pub mod cli;
pub mod collector;
pub mod config;
pub mod crawl;
pub mod domain;
pub mod downloader;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod link;
pub mod loader;
pub mod logging;
pub mod parse;
pub mod pipeline;
pub mod requests;
pub mod response;
pub mod rules;
pub mod spider;
pub mod spiders;

pub use scraper;

pub use crate::collector::{Collector, Handler, Stats};
pub use crate::config::CrawlerConfig;
pub use crate::crawl::CrawlDispatcher;
pub use crate::downloader::{Downloader, HttpDownloader, MemoryDownloader};
pub use crate::driver::{DriverOptions, ParseDriver};
pub use crate::error::{CrawlError, Failure};
pub use crate::ledger::DepthLedger;
pub use crate::link::{Link, LinkExtractor};
pub use crate::loader::SpiderLoader;
pub use crate::pipeline::{ItemPipeline, LogPipeline, Pipelines};
pub use crate::requests::{Callback, Errback, Kwargs, Meta, Request, RequestDelay};
pub use crate::response::Response;
pub use crate::rules::Rule;
pub use crate::spider::{Output, Produced, Registry, Spider};
