use reqwest::{StatusCode, Url};
use std::fmt;
use thiserror::Error;

use crate::requests::Request;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Cannot find callback {:?} in spider: {}", .callback, .spider)]
    UnknownCallback { spider: String, callback: String },
    #[error("No CrawlSpider rules found in spider {:?}, please specify a callback to use for parsing", .spider)]
    NoRules { spider: String },
    #[error("Cannot find a rule that matches {:?} in spider: {}", .url.as_str(), .spider)]
    NoRuleMatch { spider: String, url: Url },
    #[error("Response for {} carries rule index {} but spider {} only has {} rules", .request.url, .index, .spider, .len)]
    UnknownRule {
        spider: String,
        index: usize,
        len: usize,
        request: Box<Request>,
    },
    #[error("Received response with non 2xx status {} for {}", .status, .request.url)]
    NoSuccessResponse {
        status: StatusCode,
        /// The request that was issued
        request: Box<Request>,
    },
    #[error("Rejected a request to {}, because its url is disallowed due to {}", .request.url, .reason)]
    DisallowedRequest {
        reason: DisallowReason,
        request: Box<Request>,
    },
    #[error("Failed to process invalid request for {}", .request.url)]
    InvalidRequest { request: Box<Request> },
    #[error("Unable to find spider: {0}")]
    UnknownSpider(String),
    #[error("Unable to find spider for: {0}")]
    NoSpiderForUrl(Url),
    #[error("More than one spider can handle {}: {}", .url, .spiders.join(", "))]
    AmbiguousSpider { url: Url, spiders: Vec<String> },
    #[error("Invalid link pattern {:?}: {}", .pattern, .reason)]
    InvalidPattern { pattern: String, reason: String },
    #[error("Invalid {} argument, expected a JSON object: {}", .option, .reason)]
    InvalidJson { option: &'static str, reason: String },
}

impl CrawlError {
    /// Get the request this error is carrying, if any
    pub fn request(&self) -> Option<&Request> {
        match self {
            CrawlError::UnknownRule { request, .. }
            | CrawlError::NoSuccessResponse { request, .. }
            | CrawlError::DisallowedRequest { request, .. }
            | CrawlError::InvalidRequest { request } => Some(request),
            _ => None,
        }
    }

    /// Recover the request this error may be carrying
    pub fn into_request(self) -> Option<Request> {
        match self {
            CrawlError::UnknownRule { request, .. }
            | CrawlError::NoSuccessResponse { request, .. }
            | CrawlError::DisallowedRequest { request, .. }
            | CrawlError::InvalidRequest { request } => Some(*request),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisallowReason {
    /// The host is not covered by the allowed domains
    Offsite,
    /// The host is on the block list
    Blocked,
}

impl fmt::Display for DisallowReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisallowReason::Offsite => {
                write!(f, "URL is not covered by the allowed domains")
            }
            DisallowReason::Blocked => {
                write!(f, "URL blocked by user config")
            }
        }
    }
}

/// A failed request handed to an error callback.
#[derive(Debug)]
pub struct Failure {
    /// The request that failed
    pub request: Request,
    /// Why it failed, either while fetching or inside its callback
    pub error: anyhow::Error,
}

impl Failure {
    pub fn new(request: Request, error: impl Into<anyhow::Error>) -> Self {
        Self {
            request,
            error: error.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {:#}", self.request.url, self.error)
    }
}
