//! Scripted network for testing
//!
//! Routes are keyed by method and URL exactly as the request carries them.
//! Each route holds a queue of one-shot replies and an optional sticky reply
//! used once the queue is empty. Unknown routes answer 404.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{NetResponse, Network, OutboundRequest};
use crate::error::FetchError;

type RouteKey = (String, String);

/// A scripted outcome for one call
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(NetResponse),
    Fail(FetchError),
}

#[derive(Default)]
struct Route {
    queued: VecDeque<MockReply>,
    sticky: Option<MockReply>,
}

/// Mock network for testing.
///
/// # Example
/// ```ignore
/// let network = MockNetwork::new()
///     .with_response("GET", "/api/docs", NetResponse::new(200, "[]"))
///     .await;
/// ```
#[derive(Default)]
pub struct MockNetwork {
    routes: Arc<Mutex<HashMap<RouteKey, Route>>>,
    /// Every request seen, in arrival order
    captured: Arc<Mutex<Vec<OutboundRequest>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    offline: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn key(method: &str, url: &str) -> RouteKey {
    (method.to_ascii_uppercase(), url.to_string())
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to the route with this response
    pub async fn with_response(self, method: &str, url: &str, response: NetResponse) -> Self {
        self.routes.lock().await.entry(key(method, url)).or_default().sticky =
            Some(MockReply::Respond(response));
        self
    }

    /// Fail every call to the route with this error
    pub async fn with_failure(self, method: &str, url: &str, error: FetchError) -> Self {
        self.routes.lock().await.entry(key(method, url)).or_default().sticky =
            Some(MockReply::Fail(error));
        self
    }

    /// Queue a one-shot reply, consumed before any sticky reply
    pub async fn then(self, method: &str, url: &str, reply: MockReply) -> Self {
        self.push(method, url, reply).await;
        self
    }

    /// Queue a one-shot reply on an existing mock
    pub async fn push(&self, method: &str, url: &str, reply: MockReply) {
        self.routes
            .lock()
            .await
            .entry(key(method, url))
            .or_default()
            .queued
            .push_back(reply);
    }

    /// Replace the sticky reply on an existing mock
    pub async fn set_response(&self, method: &str, url: &str, response: NetResponse) {
        self.routes.lock().await.entry(key(method, url)).or_default().sticky =
            Some(MockReply::Respond(response));
    }

    /// Delay every reply by this long
    pub async fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().await = Some(latency);
        self
    }

    /// While offline every call fails before reaching any route
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn calls(&self, method: &str, url: &str) -> usize {
        let wanted = key(method, url);
        self.captured
            .lock()
            .await
            .iter()
            .filter(|r| key(&r.method, &r.url) == wanted)
            .count()
    }

    pub async fn total_calls(&self) -> usize {
        self.captured.lock().await.len()
    }

    pub async fn captured(&self) -> Vec<OutboundRequest> {
        self.captured.lock().await.clone()
    }

    /// Highest number of calls that were in progress at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn next_reply(&self, request: &OutboundRequest) -> MockReply {
        let mut routes = self.routes.lock().await;
        match routes.get_mut(&key(&request.method, &request.url)) {
            Some(route) => route
                .queued
                .pop_front()
                .or_else(|| route.sticky.clone())
                .unwrap_or_else(|| MockReply::Respond(NetResponse::new(404, "not found"))),
            None => MockReply::Respond(NetResponse::new(404, "not found")),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn send(&self, request: &OutboundRequest) -> Result<NetResponse, FetchError> {
        self.captured.lock().await.push(request.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline("mock network offline".to_string()));
        }

        let reply = self.next_reply(request).await;

        let latency = *self.latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let network = MockNetwork::new();
        let response = network.send(&OutboundRequest::get("/nope")).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_queued_replies_precede_sticky() {
        let network = MockNetwork::new()
            .with_response("GET", "/a", NetResponse::new(200, "sticky"))
            .await
            .then(
                "GET",
                "/a",
                MockReply::Fail(FetchError::Offline("once".to_string())),
            )
            .await;

        assert!(network.send(&OutboundRequest::get("/a")).await.is_err());
        let ok = network.send(&OutboundRequest::get("/a")).await.unwrap();
        assert_eq!(ok.body, b"sticky");
        assert_eq!(network.calls("GET", "/a").await, 2);
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let network = MockNetwork::new()
            .with_response("GET", "/a", NetResponse::new(200, "x"))
            .await;
        network.set_offline(true);

        let err = network.send(&OutboundRequest::get("/a")).await.unwrap_err();
        assert!(matches!(err, FetchError::Offline(_)));
    }
}
