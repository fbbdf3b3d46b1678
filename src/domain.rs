use std::collections::HashSet;

use crate::error::{CrawlError, DisallowReason};
use crate::link::host_in_domains;
use crate::requests::Request;

/// Decides which hosts requests may be sent to.
#[derive(Debug, Clone)]
pub enum DomainFilter {
    /// Only these domains and their subdomains, anything if empty
    AllowList(Vec<String>),
    /// Anything but these domains and their subdomains
    BlockList(Vec<String>),
}

impl DomainFilter {
    /// An allow list if any domain is allowed, the block list otherwise.
    pub fn new(allowed: &HashSet<String>, blocked: &HashSet<String>) -> Self {
        if allowed.is_empty() {
            let mut blocked: Vec<_> = blocked.iter().cloned().collect();
            blocked.sort();
            DomainFilter::BlockList(blocked)
        } else {
            let mut allowed: Vec<_> = allowed.iter().cloned().collect();
            allowed.sort();
            DomainFilter::AllowList(allowed)
        }
    }

    /// Rejects requests without a host and requests to hosts this filter
    /// does not admit.
    pub fn check(&self, request: Request) -> Result<Request, CrawlError> {
        let Some(host) = request.url.host_str() else {
            if request.url.scheme() == "file" {
                return Ok(request);
            }
            return Err(CrawlError::InvalidRequest {
                request: Box::new(request),
            });
        };
        let reason = match self {
            DomainFilter::AllowList(domains) => {
                if domains.is_empty() || host_in_domains(host, domains) {
                    None
                } else {
                    Some(DisallowReason::Offsite)
                }
            }
            DomainFilter::BlockList(domains) => {
                if host_in_domains(host, domains) {
                    Some(DisallowReason::Blocked)
                } else {
                    None
                }
            }
        };
        match reason {
            Some(reason) => Err(CrawlError::DisallowedRequest {
                reason,
                request: Box::new(request),
            }),
            None => Ok(request),
        }
    }
}

impl Default for DomainFilter {
    fn default() -> Self {
        DomainFilter::BlockList(Vec::new())
    }
}
