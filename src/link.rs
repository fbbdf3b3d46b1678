//! Link extraction from html responses.

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::error::CrawlError;
use crate::response::Response;

/// File extensions that are never worth following.
pub const IGNORED_EXTENSIONS: &[&str] = &[
    // archives
    "7z", "7zip", "bz2", "rar", "tar", "tar.gz", "xz", "zip", //
    // images
    "mng", "pct", "bmp", "gif", "jpg", "jpeg", "png", "pst", "psp", "tif", "tiff", "ai", "drw",
    "dxf", "eps", "ps", "svg", "cdr", "ico", "webp", //
    // audio
    "mp3", "wma", "ogg", "wav", "ra", "aac", "mid", "au", "aiff", //
    // video
    "3gp", "asf", "asx", "avi", "mov", "mp4", "mpg", "qt", "rm", "swf", "wmv", "m4a", "m4v", "flv",
    "webm", //
    // office suites
    "xls", "xlsx", "ppt", "pptx", "pps", "doc", "docx", "odt", "ods", "odg", "odp", //
    // other
    "css", "pdf", "exe", "bin", "rss", "dmg", "iso", "apk", "jar",
];

/// A link found in a response.
///
/// Two links are the same link if their url and anchor text match.
#[derive(Debug, Clone)]
pub struct Link {
    /// Absolute url, without fragment
    pub url: Url,
    /// Trimmed text content of the element the link was found on
    pub text: String,
    pub fragment: String,
    /// Whether the element carried `rel="nofollow"`
    pub nofollow: bool,
}

impl Link {
    pub fn new(url: Url, text: impl Into<String>) -> Self {
        Self {
            url,
            text: text.into(),
            fragment: String::new(),
            nofollow: false,
        }
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.text == other.text
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.text.hash(state);
    }
}

/// Extracts the links of an html response that pass the configured
/// filters, in document order.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    allow_domains: Vec<String>,
    deny_domains: Vec<String>,
    deny_extensions: Vec<String>,
    restrict_css: Vec<String>,
    tags: Vec<String>,
    attrs: Vec<String>,
    unique: bool,
    canonicalize: bool,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            allow_domains: Vec::new(),
            deny_domains: Vec::new(),
            deny_extensions: IGNORED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            restrict_css: Vec::new(),
            tags: vec!["a".to_string(), "area".to_string()],
            attrs: vec!["href".to_string()],
            unique: true,
            canonicalize: false,
        }
    }
}

impl LinkExtractor {
    pub fn builder() -> LinkExtractorBuilder {
        LinkExtractorBuilder::default()
    }

    /// Extractor that only keeps urls matching `pattern`
    pub fn allow(pattern: &str) -> Result<Self, CrawlError> {
        Self::builder().allow(pattern).build()
    }

    /// Whether `url` passes the domain and pattern filters.
    pub fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        if !self.allow_domains.is_empty() && !host_in_domains(host, &self.allow_domains) {
            return false;
        }
        if !self.deny_domains.is_empty() && host_in_domains(host, &self.deny_domains) {
            return false;
        }
        let allowed = self.allow.is_empty() || self.allow.iter().any(|re| re.is_match(url.as_str()));
        let denied = self.deny.iter().any(|re| re.is_match(url.as_str()));
        allowed && !denied
    }

    pub fn extract_links(&self, response: &Response) -> Vec<Link> {
        let html = response.html();
        let base_url = base_url(&html, response.url());

        let tag_selector = match Selector::parse(&self.tags.join(", ")) {
            Ok(selector) => selector,
            Err(_) => return Vec::new(),
        };

        let mut elements = Vec::new();
        if self.restrict_css.is_empty() {
            elements.extend(html.select(&tag_selector));
        } else {
            for css in &self.restrict_css {
                let Ok(restrict) = Selector::parse(css) else {
                    continue;
                };
                for region in html.select(&restrict) {
                    if self.tags.iter().any(|t| t == region.value().name()) {
                        elements.push(region);
                    }
                    elements.extend(region.select(&tag_selector));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for el in elements {
            for attr in &self.attrs {
                let Some(value) = el.value().attr(attr) else {
                    continue;
                };
                let Some(link) = self.link_from(el, value.trim(), &base_url) else {
                    continue;
                };
                if !self.is_allowed(&link.url) {
                    continue;
                }
                if self.unique && !seen.insert(link.url.clone()) {
                    continue;
                }
                links.push(link);
            }
        }
        links
    }

    fn link_from(&self, el: ElementRef<'_>, href: &str, base_url: &Url) -> Option<Link> {
        let mut url = base_url.join(href).ok()?;
        let fragment = url.fragment().unwrap_or_default().to_string();
        url.set_fragment(None);
        if self.canonicalize {
            canonicalize(&mut url);
        }
        let text = el.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let nofollow = el
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("nofollow")))
            .unwrap_or(false);
        Some(Link {
            url,
            text,
            fragment,
            nofollow,
        })
    }

    fn is_allowed(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return false;
        }
        if !self.matches(url) {
            return false;
        }
        let path = url.path().to_ascii_lowercase();
        !self
            .deny_extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkExtractorBuilder {
    allow: Vec<String>,
    deny: Vec<String>,
    allow_domains: Vec<String>,
    deny_domains: Vec<String>,
    deny_extensions: Option<Vec<String>>,
    restrict_css: Vec<String>,
    tags: Option<Vec<String>>,
    attrs: Option<Vec<String>>,
    unique: Option<bool>,
    canonicalize: bool,
}

impl LinkExtractorBuilder {
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.allow.push(pattern.into());
        self
    }

    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.deny.push(pattern.into());
        self
    }

    pub fn allow_domain(mut self, domain: impl Into<String>) -> Self {
        self.allow_domains.push(domain.into());
        self
    }

    pub fn deny_domain(mut self, domain: impl Into<String>) -> Self {
        self.deny_domains.push(domain.into());
        self
    }

    /// Replaces the default [`IGNORED_EXTENSIONS`]
    pub fn deny_extensions<I, T>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.deny_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    /// Only consider links inside elements matching this css selector
    pub fn restrict_css(mut self, css: impl Into<String>) -> Self {
        self.restrict_css.push(css.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn attrs<I, T>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.attrs = Some(attrs.into_iter().map(Into::into).collect());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn canonicalize(mut self, canonicalize: bool) -> Self {
        self.canonicalize = canonicalize;
        self
    }

    pub fn build(self) -> Result<LinkExtractor, CrawlError> {
        let defaults = LinkExtractor::default();
        let tags = self.tags.unwrap_or(defaults.tags);
        for css in self.restrict_css.iter().chain(std::iter::once(&tags.join(", "))) {
            if let Err(err) = Selector::parse(css) {
                return Err(CrawlError::InvalidPattern {
                    pattern: css.clone(),
                    reason: format!("{:?}", err),
                });
            }
        }
        Ok(LinkExtractor {
            allow: compile(self.allow)?,
            deny: compile(self.deny)?,
            allow_domains: self.allow_domains,
            deny_domains: self.deny_domains,
            deny_extensions: self.deny_extensions.unwrap_or(defaults.deny_extensions),
            restrict_css: self.restrict_css,
            tags,
            attrs: self.attrs.unwrap_or(defaults.attrs),
            unique: self.unique.unwrap_or(defaults.unique),
            canonicalize: self.canonicalize,
        })
    }
}

fn compile(patterns: Vec<String>) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .into_iter()
        .map(|pattern| {
            Regex::new(&pattern).map_err(|err| CrawlError::InvalidPattern {
                reason: err.to_string(),
                pattern,
            })
        })
        .collect()
}

/// Whether `host` is one of `domains` or a subdomain of one.
pub(crate) fn host_in_domains(host: &str, domains: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}

fn base_url(html: &Html, response_url: &Url) -> Url {
    let base = Selector::parse("base[href]").ok().and_then(|selector| {
        html.select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| response_url.join(href.trim()).ok())
    });
    base.unwrap_or_else(|| response_url.clone())
}

fn canonicalize(url: &mut Url) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
        return;
    }
    pairs.sort();
    url.query_pairs_mut().clear().extend_pairs(pairs);
}
