//! The real network behind the interception layer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::FetchError;

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod rate_limit;

pub use http::HttpNetwork;
#[cfg(test)]
pub use mock::MockNetwork;

/// Transport for outbound requests.
///
/// Implementations return a response for every status code the server sends;
/// only transport failures surface as `Err`. Status classification is done
/// by [`NetResponse::check`] so every caller applies the same rules.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<NetResponse, FetchError>;
}

/// Resolve a request URL, absolute or origin-relative, against the portal base
pub fn resolve_url(base: &Url, raw: &str) -> Result<Url, FetchError> {
    base.join(raw)
        .map_err(|e| FetchError::InvalidRequest(format!("Invalid URL {}: {}", raw, e)))
}

/// A request as issued by the page layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "crate::store::base64_opt")]
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    #[cfg(test)]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// GET and HEAD are the only methods that never change server state
    pub fn is_write(&self) -> bool {
        !matches!(self.method.as_str(), "GET" | "HEAD")
    }
}

/// A complete response. Bodies are fully buffered before this exists, so a
/// cache write never sees a partial payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "crate::store::base64_bytes")]
    pub body: Vec<u8>,
}

impl NetResponse {
    #[cfg(test)]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and 5xx: the server may accept the same request later
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }

    /// Only complete 200 responses the server allows us to keep are stored
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
            && !self
                .header("cache-control")
                .is_some_and(|v| v.to_ascii_lowercase().contains("no-store"))
    }

    /// Classify the status code into success, transient failure or rejection
    pub fn check(self) -> Result<NetResponse, FetchError> {
        match self.status {
            200..=399 => Ok(self),
            429 => {
                let retry_after = self
                    .header("retry-after")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(60);
                Err(FetchError::RateLimit(Duration::from_secs(retry_after)))
            }
            500..=599 => Err(FetchError::Server {
                status: self.status,
                message: self.body_snippet(),
            }),
            status => Err(FetchError::Rejected {
                status,
                message: self.body_snippet(),
            }),
        }
    }

    fn body_snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(200).collect()
    }
}
