//! Spiders that ship with the binary.

use anyhow::Result;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::link::LinkExtractor;
use crate::loader::SpiderLoader;
use crate::requests::{Kwargs, Request};
use crate::response::Response;
use crate::rules::Rule;
use crate::spider::{Output, Produced, Registry, Spider};

/// A visited page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub url: String,
    pub title: Option<String>,
}

impl Page {
    fn from_response(response: &Response) -> Self {
        Self {
            url: response.url().to_string(),
            title: title(&response.html()),
        }
    }
}

fn title(html: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = html.select(&selector).next()?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Yields every page and follows every link from `parse`.
#[derive(Debug, Default)]
pub struct LinksSpider {
    links: LinkExtractor,
}

impl Spider for LinksSpider {
    type Item = Page;

    fn name(&self) -> &str {
        "links"
    }

    fn parse(&self, response: Response, _kwargs: Kwargs) -> Result<Produced<Page>> {
        let mut outputs = vec![Output::Item(Page::from_response(&response))];
        if response.is_html() {
            outputs.extend(
                self.links
                    .extract_links(&response)
                    .into_iter()
                    .map(|link| Output::Request(Request::new(link.url))),
            );
        }
        Ok(outputs.into())
    }
}

/// Crawls by a single rule that follows every link into `parse_page`.
#[derive(Debug, Default)]
pub struct FollowSpider;

impl FollowSpider {
    fn parse_page(&self, response: Response, _kwargs: Kwargs) -> Result<Produced<Page>> {
        Ok(Produced::item(Page::from_response(&response)))
    }
}

impl Spider for FollowSpider {
    type Item = Page;

    fn name(&self) -> &str {
        "follow"
    }

    fn registry(&self) -> Registry<Self> {
        Registry::new().callback("parse_page", Self::parse_page)
    }

    fn rules(&self) -> Option<Vec<Rule<Self>>> {
        Some(vec![Rule::new(LinkExtractor::default())
            .callback("parse_page")
            .follow(true)])
    }
}

/// The loader with all built-in spiders.
pub fn loader() -> SpiderLoader {
    SpiderLoader::builder()
        .register(LinksSpider::default)
        .register(|| FollowSpider)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use crate::crawl::{CrawlDispatcher, Resolved};

    const PAGE: &str = r#"<html><head><title> Home </title></head><body>
        <a href="/about">About</a>
        <a href="mailto:someone@example.com">Mail</a>
    </body></html>"#;

    fn response() -> Response {
        Response::new(Request::new("http://example.com/".parse().unwrap()), PAGE)
    }

    #[tokio::test]
    async fn links_spider_yields_page_and_links() {
        let outputs = LinksSpider::default()
            .parse(response(), Kwargs::new())
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(outputs.len(), 2);
        match &outputs[0] {
            Output::Item(page) => {
                assert_eq!(page.title.as_deref(), Some("Home"));
                assert_eq!(page.url, "http://example.com/");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &outputs[1] {
            Output::Request(request) => assert_eq!(request.url.path(), "/about"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn follow_spider_rule_uses_parse_page() {
        let dispatcher = CrawlDispatcher::new(FollowSpider, &CrawlerConfig::default()).unwrap();
        let rules = dispatcher.rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].follow);
        assert!(rules[0].callback.is_some());
        assert_eq!(rules[0].callback_name.as_deref(), Some("parse_page"));
        assert!(matches!(
            dispatcher.callback_from_rules(&response()),
            Ok(Resolved::Method(_))
        ));
        assert_eq!(dispatcher.requests_to_follow(&response()).len(), 1);
    }

    #[test]
    fn builtin_loader() {
        let loader = loader();
        assert_eq!(loader.names().collect::<Vec<_>>(), vec!["follow", "links"]);
    }
}
