use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};

use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::requests::Request;
use crate::response::Response;

/// Fetches the response for a request.
pub trait Downloader: Send + Sync + 'static {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>>;
}

/// Downloads over http(s) with a shared `reqwest::Client`, `file` urls are
/// read from disk.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Arc<reqwest::Client>,
    /// Whether to ignore responses with a non 2xx response code
    skip_non_successful_responses: bool,
}

impl HttpDownloader {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: Arc::new(builder.build()?),
            skip_non_successful_responses: config.skip_non_successful_responses,
        })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        if request.url.scheme() == "file" {
            return read_file(request).boxed();
        }
        get_response(
            &self.client,
            request,
            self.skip_non_successful_responses,
        )
    }
}

fn get_response(
    client: &reqwest::Client,
    request: Request,
    skip_non_successful_responses: bool,
) -> BoxFuture<'static, Result<Response>> {
    let fut = client
        .request(request.method.clone(), request.url.clone())
        .send();

    Box::pin(async move {
        let mut resp = fut.await?;

        if !resp.status().is_success() && skip_non_successful_responses {
            // skip unsuccessful response
            return Err(CrawlError::NoSuccessResponse {
                status: resp.status(),
                request: Box::new(request),
            }
            .into());
        }

        let (status, url, headers) = response_info(&mut resp);
        let text = resp.text().await?;

        Ok(Response {
            response_url: url,
            response_status: status,
            response_headers: headers,
            text,
            request,
        })
    })
}

async fn read_file(request: Request) -> Result<Response> {
    let path = request
        .url
        .to_file_path()
        .map_err(|_| CrawlError::InvalidRequest {
            request: Box::new(request.clone()),
        })?;
    let text = tokio::fs::read_to_string(&path).await?;
    let mut response = Response::new(request, text);
    if matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("html" | "htm")
    ) {
        response
            .response_headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    }
    Ok(response)
}

fn response_info(resp: &mut reqwest::Response) -> (StatusCode, Url, HeaderMap) {
    let mut headers = HeaderMap::new();
    std::mem::swap(&mut headers, resp.headers_mut());
    (resp.status(), resp.url().clone(), headers)
}

/// Serves html pages from memory, unknown urls fail with a 404.
#[derive(Debug, Clone, Default)]
pub struct MemoryDownloader {
    pages: HashMap<String, String>,
}

impl MemoryDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }
}

impl Downloader for MemoryDownloader {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        let result = match self.pages.get(request.url.as_str()) {
            Some(html) => {
                let mut response = Response::new(request, html.clone());
                response
                    .response_headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
                Ok(response)
            }
            None => Err(CrawlError::NoSuccessResponse {
                status: StatusCode::NOT_FOUND,
                request: Box::new(request),
            }
            .into()),
        };
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_downloader_serves_known_pages() {
        let downloader = MemoryDownloader::new().page("http://example.com/", "<p>hi</p>");
        let response = downloader
            .fetch(Request::new("http://example.com/".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.text, "<p>hi</p>");
        assert!(response.is_html());

        let err = downloader
            .fetch(Request::new("http://example.com/missing".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::NoSuccessResponse { .. })
        ));
    }

    #[tokio::test]
    async fn file_urls_are_read_from_disk() {
        let path = std::env::temp_dir().join(format!("wayfarer-{}.html", std::process::id()));
        std::fs::write(&path, "<a href=\"other.html\">other</a>").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let downloader = HttpDownloader::new(&CrawlerConfig::default()).unwrap();
        let response = downloader.fetch(Request::new(url)).await.unwrap();
        assert!(response.text.contains("other.html"));
        assert_eq!(
            response.response_headers.get(CONTENT_TYPE).unwrap(),
            "text/html"
        );
        std::fs::remove_file(path).unwrap();
    }
}
