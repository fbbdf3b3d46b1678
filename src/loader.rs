//! Lookup of spiders by name or url.
//!
//! Spiders are registered once at startup; the resulting [`SpiderLoader`]
//! is immutable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use crate::collector::Stats;
use crate::config::CrawlerConfig;
use crate::crawl::CrawlDispatcher;
use crate::downloader::Downloader;
use crate::driver::{DriverOptions, ParseDriver};
use crate::error::CrawlError;
use crate::ledger::DepthLedger;
use crate::pipeline::{LogPipeline, Pipelines};
use crate::requests::Request;
use crate::spider::Spider;

/// Everything needed to run a depth bounded crawl with a registered spider.
pub struct ParseJob {
    pub url: Url,
    pub options: DriverOptions,
    pub config: CrawlerConfig,
    /// Run items through the [`LogPipeline`]
    pub pipelines: bool,
    pub downloader: Arc<dyn Downloader>,
}

/// The outcome of a [`ParseJob`], with items converted to json.
#[derive(Debug)]
pub struct ParseReport {
    pub spider: String,
    pub ledger: DepthLedger<Value>,
    pub stats: Stats,
}

type Runner = Box<dyn Fn(ParseJob) -> BoxFuture<'static, Result<ParseReport>> + Send + Sync>;

/// A registered spider.
pub struct SpiderEntry {
    name: String,
    handles_url: Box<dyn Fn(&Url) -> bool + Send + Sync>,
    runner: Runner,
}

impl SpiderEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles_url(&self, url: &Url) -> bool {
        (self.handles_url)(url)
    }

    /// Crawls `job.url` with a fresh instance of this spider.
    pub fn parse(&self, job: ParseJob) -> BoxFuture<'static, Result<ParseReport>> {
        (self.runner)(job)
    }
}

impl fmt::Debug for SpiderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiderEntry")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Default)]
pub struct SpiderLoaderBuilder {
    spiders: BTreeMap<String, SpiderEntry>,
}

impl SpiderLoaderBuilder {
    /// Registers the spider `factory` creates under its name.
    ///
    /// A spider registered later under the same name replaces the earlier
    /// one.
    pub fn register<S, F>(mut self, factory: F) -> Self
    where
        S: Spider,
        S::Item: Serialize,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let sample = factory();
        let name = sample.name().to_string();
        let runner: Runner = Box::new(move |job: ParseJob| run(factory(), job).boxed());
        let entry = SpiderEntry {
            name: name.clone(),
            handles_url: Box::new(move |url: &Url| sample.handles_url(url)),
            runner,
        };
        self.spiders.insert(name, entry);
        self
    }

    pub fn build(self) -> SpiderLoader {
        SpiderLoader {
            spiders: self.spiders,
        }
    }
}

async fn run<S>(spider: S, job: ParseJob) -> Result<ParseReport>
where
    S: Spider,
    S::Item: Serialize,
{
    let ParseJob {
        url,
        options,
        config,
        pipelines,
        downloader,
    } = job;
    let spider_name = spider.name().to_string();
    let dispatcher = CrawlDispatcher::new(spider, &config)?;
    let pipelines = if pipelines {
        Pipelines::new().push(LogPipeline)
    } else {
        Pipelines::new()
    };
    let driver = ParseDriver::with_pipelines(dispatcher, options, pipelines);
    let stats = driver.crawl(Request::new(url), downloader, &config).await?;
    let ledger = driver.take_ledger().try_map_items(serde_json::to_value)?;
    Ok(ParseReport {
        spider: spider_name,
        ledger,
        stats,
    })
}

/// All spiders known to the program.
pub struct SpiderLoader {
    spiders: BTreeMap<String, SpiderEntry>,
}

impl SpiderLoader {
    pub fn builder() -> SpiderLoaderBuilder {
        SpiderLoaderBuilder::default()
    }

    pub fn load(&self, name: &str) -> Result<&SpiderEntry, CrawlError> {
        self.spiders
            .get(name)
            .ok_or_else(|| CrawlError::UnknownSpider(name.to_string()))
    }

    /// The only spider that handles `url`.
    pub fn for_url(&self, url: &Url) -> Result<&SpiderEntry, CrawlError> {
        let mut matching = self.spiders.values().filter(|entry| entry.handles_url(url));
        match (matching.next(), matching.next()) {
            (Some(entry), None) => Ok(entry),
            (None, _) => Err(CrawlError::NoSpiderForUrl(url.clone())),
            (Some(first), Some(second)) => {
                let mut spiders = vec![first.name.clone(), second.name.clone()];
                spiders.extend(matching.map(|entry| entry.name.clone()));
                Err(CrawlError::AmbiguousSpider {
                    url: url.clone(),
                    spiders,
                })
            }
        }
    }

    /// Names of all registered spiders, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.spiders.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::MemoryDownloader;
    use crate::requests::Kwargs;
    use crate::response::Response;
    use crate::spider::Produced;

    struct Named {
        name: &'static str,
        domains: Vec<String>,
    }

    impl Spider for Named {
        type Item = String;

        fn name(&self) -> &str {
            self.name
        }

        fn allowed_domains(&self) -> Vec<String> {
            self.domains.clone()
        }

        fn parse(&self, response: Response, _kwargs: Kwargs) -> Result<Produced<String>> {
            Ok(Produced::item(response.url().to_string()))
        }
    }

    fn loader() -> SpiderLoader {
        SpiderLoader::builder()
            .register(|| Named {
                name: "docs",
                domains: vec!["docs.rs".to_string()],
            })
            .register(|| Named {
                name: "crates",
                domains: vec!["crates.io".to_string(), "docs.rs".to_string()],
            })
            .register(|| Named {
                name: "example.com",
                domains: vec![],
            })
            .build()
    }

    #[test]
    fn load_by_name() {
        let loader = loader();
        assert_eq!(loader.load("docs").unwrap().name(), "docs");
        assert!(matches!(
            loader.load("missing"),
            Err(CrawlError::UnknownSpider(name)) if name == "missing"
        ));
        assert_eq!(
            loader.names().collect::<Vec<_>>(),
            vec!["crates", "docs", "example.com"]
        );
    }

    #[test]
    fn find_by_url() {
        let loader = loader();
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            loader.for_url(&url("https://crates.io/")).unwrap().name(),
            "crates"
        );
        // spiders without domains handle their own name
        assert_eq!(
            loader
                .for_url(&url("http://www.example.com/a"))
                .unwrap()
                .name(),
            "example.com"
        );
        assert!(matches!(
            loader.for_url(&url("https://docs.rs/")),
            Err(CrawlError::AmbiguousSpider { spiders, .. }) if spiders.len() == 2
        ));
        assert!(matches!(
            loader.for_url(&url("https://rust-lang.org/")),
            Err(CrawlError::NoSpiderForUrl(_))
        ));
    }

    #[tokio::test]
    async fn parse_reports_json_items() {
        let loader = loader();
        let downloader = MemoryDownloader::new().page("http://example.com/", "<p></p>");
        let job = ParseJob {
            url: Url::parse("http://example.com/").unwrap(),
            options: DriverOptions::default(),
            config: CrawlerConfig::default(),
            pipelines: true,
            downloader: Arc::new(downloader),
        };
        let report = loader.load("example.com").unwrap().parse(job).await.unwrap();
        assert_eq!(report.spider, "example.com");
        assert_eq!(
            report.ledger.items_at(1),
            &[Value::from("http://example.com/")]
        );
        assert_eq!(report.stats.request_count, 1);
    }
}
