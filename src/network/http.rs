//! reqwest-backed network transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use url::Url;

use super::rate_limit::{EndpointCategory, RateLimiterSet};
use super::{NetResponse, Network, OutboundRequest, resolve_url};
use crate::error::FetchError;

/// Hard ceiling for a single HTTP exchange, independent of the interceptor's
/// per-strategy timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Network transport talking to the portal origin
pub struct HttpNetwork {
    http: HttpClient,
    base_url: Url,
    limiters: Arc<RateLimiterSet>,
}

impl HttpNetwork {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::InvalidRequest(format!("Invalid base URL: {}", e)))?;

        let http = HttpClient::builder()
            .timeout(CLIENT_TIMEOUT)
            .user_agent(concat!("portal-offline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            limiters: Arc::new(RateLimiterSet::new()),
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: &OutboundRequest) -> Result<NetResponse, FetchError> {
        let url = resolve_url(&self.base_url, &request.url)?;
        let category = EndpointCategory::from_request(url.path(), &request.method);

        self.limiters.wait_for(category).await;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(format!("Invalid method: {}", e)))?;

        let mut builder = self.http.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(FetchError::from)?;

        let status = response.status().as_u16();
        if status == 429 {
            self.limiters.activate(category).await;
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Buffer the whole body; a dropped connection mid-body is a transport failure
        let body = response.bytes().await.map_err(FetchError::from)?.to_vec();

        log::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(NetResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_creation() {
        assert!(HttpNetwork::new("https://portal.test").is_ok());
        assert!(HttpNetwork::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_send_returns_response_for_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/documents/1")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let network = HttpNetwork::new(&server.url()).unwrap();
        let response = network
            .send(&OutboundRequest::get("/api/documents/1"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"maintenance");
    }

    #[tokio::test]
    async fn test_send_forwards_body_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/notes")
            .match_header("x-request-id", "abc")
            .match_body("{\"title\":\"hi\"}")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body("{\"id\":9}")
            .create_async()
            .await;

        let network = HttpNetwork::new(&server.url()).unwrap();
        let request = OutboundRequest::new("POST", "/api/notes")
            .with_header("x-request-id", "abc")
            .with_body("{\"title\":\"hi\"}");
        let response = network.send(&request).await.unwrap();

        m.assert_async().await;
        assert_eq!(response.status, 201);
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_rate_limit_activates_throttle() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/search")
            .with_status(429)
            .with_header("retry-after", "1")
            .create_async()
            .await;

        let network = HttpNetwork::new(&server.url()).unwrap();
        let response = network.send(&OutboundRequest::get("/api/search")).await.unwrap();

        assert_eq!(response.status, 429);
        assert!(network.limiters.is_active(EndpointCategory::Search).await);
        assert!(!network.limiters.is_active(EndpointCategory::Default).await);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_offline() {
        // Nothing listens on port 9 (discard) on loopback in test environments
        let network = HttpNetwork::new("http://127.0.0.1:9").unwrap();
        let err = network
            .send(&OutboundRequest::get("/api/documents"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
