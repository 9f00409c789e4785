//! Per-endpoint throttling for the portal API
//!
//! Reactive: a category is only throttled after the server has answered 429
//! for it. Until then requests flow at full speed.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use tokio::sync::RwLock;

/// Categories of portal endpoints with their sustained rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    /// /api/search.* - 10 req/sec
    Search,
    /// Uploads (POST/PUT .../upload) - 30 req/min
    Upload,
    /// /api/ms365/.* proxied Graph calls - 4 req/sec
    Graph,
    /// /api/auth/.* - 1 req/sec
    Auth,
    /// Everything else - 20 req/sec
    Default,
}

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 5] = [
        EndpointCategory::Search,
        EndpointCategory::Upload,
        EndpointCategory::Graph,
        EndpointCategory::Auth,
        EndpointCategory::Default,
    ];

    /// Categorize a request based on its path and method.
    pub fn from_request(path: &str, method: &str) -> Self {
        let path = path.strip_prefix("/api").unwrap_or(path);

        if path.starts_with("/auth") {
            return EndpointCategory::Auth;
        }

        if (method == "POST" || method == "PUT") && path.contains("/upload") {
            return EndpointCategory::Upload;
        }

        if path.starts_with("/ms365") {
            return EndpointCategory::Graph;
        }

        if path.starts_with("/search") {
            return EndpointCategory::Search;
        }

        EndpointCategory::Default
    }

    /// Requests per second once throttling is active
    pub fn rate_limit(&self) -> f64 {
        match self {
            EndpointCategory::Search => 10.0,
            EndpointCategory::Upload => 0.5, // 30 per minute
            EndpointCategory::Graph => 4.0,
            EndpointCategory::Auth => 1.0,
            EndpointCategory::Default => 20.0,
        }
    }
}

/// Rate limiter state for a single endpoint category.
pub struct EndpointRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    active: AtomicBool,
    category: EndpointCategory,
}

impl EndpointRateLimiter {
    pub fn new(category: EndpointCategory) -> Self {
        let rate = category.rate_limit();

        // Sub-1 rates are expressed as per-minute quotas
        let quota = if rate >= 1.0 {
            Quota::per_second(NonZeroU32::new(rate as u32).unwrap_or(NonZeroU32::MIN))
        } else {
            let per_min = (rate * 60.0).round() as u32;
            Quota::per_minute(NonZeroU32::new(per_min).unwrap_or(NonZeroU32::MIN))
        };

        Self {
            limiter: RateLimiter::direct(quota),
            active: AtomicBool::new(false),
            category,
        }
    }

    pub fn activate(&self) {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if !was_active {
            debug!("Throttling activated for {:?}", self.category);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn wait_if_active(&self) {
        if self.is_active() {
            debug!("Waiting for rate limiter {:?}", self.category);
            self.limiter.until_ready().await;
        }
    }
}

/// Rate limiters for every endpoint category.
pub struct RateLimiterSet {
    limiters: RwLock<HashMap<EndpointCategory, EndpointRateLimiter>>,
}

impl Default for RateLimiterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterSet {
    pub fn new() -> Self {
        let map = EndpointCategory::ALL
            .into_iter()
            .map(|category| (category, EndpointRateLimiter::new(category)))
            .collect();

        Self {
            limiters: RwLock::new(map),
        }
    }

    pub async fn wait_for(&self, category: EndpointCategory) {
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(&category) {
            limiter.wait_if_active().await;
        }
    }

    /// Called when the server answers 429 for a category
    pub async fn activate(&self, category: EndpointCategory) {
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(&category) {
            limiter.activate();
        }
    }

    #[cfg(test)]
    pub async fn is_active(&self, category: EndpointCategory) -> bool {
        let limiters = self.limiters.read().await;
        limiters.get(&category).is_some_and(|l| l.is_active())
    }
}
