use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use scraper::Html;

use crate::requests::{Meta, Request};

/// A successful response for an issued request
#[derive(Debug, Clone)]
pub struct Response {
    /// The url of the response as received, after redirects
    pub response_url: Url,
    /// The status code of the response
    pub response_status: StatusCode,
    /// The headers of the received response
    pub response_headers: HeaderMap,
    /// The full response text.
    pub text: String,
    /// The request that was issued for this response
    pub request: Request,
}

impl Response {
    pub fn new(request: Request, text: impl Into<String>) -> Self {
        Self {
            response_url: request.url.clone(),
            response_status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            text: text.into(),
            request,
        }
    }

    pub fn url(&self) -> &Url {
        &self.response_url
    }

    /// The metadata of the originating request
    pub fn meta(&self) -> &Meta {
        &self.request.meta
    }

    /// Returns the parsed Html document
    pub fn html(&self) -> Html {
        Html::parse_document(&self.text)
    }

    /// Whether this response carries an html document.
    ///
    /// Responses without a content type are treated as html.
    pub fn is_html(&self) -> bool {
        match self
            .response_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(content_type) => {
                let content_type = content_type.to_ascii_lowercase();
                content_type.contains("html")
            }
            None => true,
        }
    }

    /// Builds a request for `href`, resolved against the response url
    pub fn follow(&self, href: &str) -> Result<Request, url::ParseError> {
        Ok(Request::new(self.response_url.join(href)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn follow_resolves_relative_links() {
        let request = Request::new("https://example.com/docs/index.html".parse().unwrap());
        let response = Response::new(request, "");
        let next = response.follow("intro.html").unwrap();
        assert_eq!(next.url.as_str(), "https://example.com/docs/intro.html");
    }

    #[test]
    fn content_type_decides_html() {
        let request = Request::new("https://example.com/data.json".parse().unwrap());
        let mut response = Response::new(request, "{}");
        assert!(response.is_html());
        response
            .response_headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!response.is_html());
        response
            .response_headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/HTML; charset=utf-8"));
        assert!(response.is_html());
    }
}
