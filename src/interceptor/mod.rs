//! Request interception
//!
//! Every outbound request passes through [`RequestInterceptor::handle`], which
//! picks a strategy from the request's resource class and answers from the
//! cache, the network or both. Writes that cannot reach the server are parked
//! in the [`SyncQueue`] and acknowledged as pending.

pub mod strategy;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

use crate::cache::{CacheEntry, CacheStorage, ResourceClass, cache_key, partition_for};
use crate::error::{CacheError, Error, FetchError, Result};
use crate::network::{NetResponse, Network, OutboundRequest, resolve_url};
use crate::queue::SyncQueue;
pub use strategy::{RequestKind, Strategy, classify};

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Network,
    /// Fresh cache entry
    Cache,
    /// Cache entry past its TTL
    Stale,
    /// The offline navigation page
    Fallback,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::Network => "network",
            Source::Cache => "cache",
            Source::Stale => "stale",
            Source::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Result of intercepting one request
#[derive(Debug, Clone, PartialEq)]
pub enum Intercepted {
    Response { response: NetResponse, source: Source },
    /// Write accepted for later delivery
    Queued { item_id: String },
}

type SharedCache = Arc<Mutex<CacheStorage>>;

/// Run `f` against the cache. Cache trouble is logged and reported as `None`
/// so callers fall through to the network.
fn with_cache<T>(
    cache: &SharedCache,
    f: impl FnOnce(&CacheStorage) -> std::result::Result<T, CacheError>,
) -> Option<T> {
    let guard = match cache.lock() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Cache lock poisoned; bypassing cache");
            return None;
        }
    };
    match f(&guard) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Cache unavailable: {}", e);
            None
        }
    }
}

fn store_response(
    cache: &SharedCache,
    class: ResourceClass,
    key: &str,
    partition: Option<&str>,
    response: &NetResponse,
) {
    if !response.is_cacheable() {
        return;
    }
    with_cache(cache, |c| c.put(class, key, partition, response, Utc::now()));
}

/// One bounded network attempt. Transient statuses become errors; other
/// statuses (including 4xx) are answers and pass through.
async fn fetch<N: Network + ?Sized>(
    network: &N,
    request: &OutboundRequest,
    timeout: Duration,
) -> std::result::Result<NetResponse, FetchError> {
    // On timeout the send future is dropped and any late answer discarded
    let response = tokio::time::timeout(timeout, network.send(request))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    if response.is_transient() {
        return response.check();
    }
    Ok(response)
}

pub struct RequestInterceptor<N: Network + 'static> {
    network: Arc<N>,
    cache: SharedCache,
    queue: Arc<SyncQueue>,
    base_url: Url,
    timeout: Duration,
    offline_page: Option<String>,
    /// Auth partition of the signed-in identity
    partition: Option<String>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: Network + 'static> RequestInterceptor<N> {
    pub fn new(network: Arc<N>, cache: SharedCache, queue: Arc<SyncQueue>, base_url: Url) -> Self {
        Self {
            network,
            cache,
            queue,
            base_url,
            timeout: Duration::from_secs(8),
            offline_page: None,
            partition: None,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_offline_page(mut self, url: Option<String>) -> Self {
        self.offline_page = url;
        self
    }

    /// Partition cache entries by the signed-in identity
    pub fn with_identity(mut self, identity: Option<&str>) -> Self {
        self.partition = identity.map(partition_for);
        self
    }

    pub async fn handle(&self, request: &OutboundRequest) -> Result<Intercepted> {
        let url = resolve_url(&self.base_url, &request.url)?;

        let class = match classify(request, &url) {
            RequestKind::Write => return self.handle_write(request).await,
            RequestKind::Read(class) => class,
        };

        let key = cache_key(&request.method, &url, self.partition.as_deref());
        let strategy = Strategy::for_class(class);
        debug!("{} {} -> {} ({})", request.method, url, class, strategy);

        let (response, source) = match strategy {
            Strategy::CacheFirst => self.cache_first(request, class, &key).await?,
            Strategy::NetworkFirst => self.network_first(request, class, &key).await?,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, class, &key).await?
            }
        };

        Ok(Intercepted::Response { response, source })
    }

    fn cached(&self, class: ResourceClass, key: &str) -> Option<CacheEntry> {
        with_cache(&self.cache, |c| c.get_any(class, key)).flatten()
    }

    fn served_from_cache(entry: CacheEntry) -> (NetResponse, Source) {
        let source = if entry.is_fresh(Utc::now()) {
            Source::Cache
        } else {
            Source::Stale
        };
        (entry.response, source)
    }

    async fn cache_first(
        &self,
        request: &OutboundRequest,
        class: ResourceClass,
        key: &str,
    ) -> Result<(NetResponse, Source)> {
        if let Some(entry) = self.cached(class, key) {
            debug!("Cache hit for {}", request.url);
            return Ok(Self::served_from_cache(entry));
        }

        match fetch(self.network.as_ref(), request, self.timeout).await {
            Ok(response) => {
                store_response(&self.cache, class, key, self.partition.as_deref(), &response);
                Ok((response, Source::Network))
            }
            Err(e) => {
                debug!("Cache and network miss for {}: {}", request.url, e);
                if class == ResourceClass::Navigation
                    && let Some(page) = self.offline_fallback()
                {
                    return Ok((page, Source::Fallback));
                }
                Err(Error::ResourceUnavailable(request.url.clone()))
            }
        }
    }

    async fn network_first(
        &self,
        request: &OutboundRequest,
        class: ResourceClass,
        key: &str,
    ) -> Result<(NetResponse, Source)> {
        match fetch(self.network.as_ref(), request, self.timeout).await {
            Ok(response) => {
                store_response(&self.cache, class, key, self.partition.as_deref(), &response);
                Ok((response, Source::Network))
            }
            Err(e) => {
                debug!("Network failed for {} ({}), trying cache", request.url, e);
                self.cached(class, key)
                    .map(Self::served_from_cache)
                    .ok_or_else(|| Error::ResourceUnavailable(request.url.clone()))
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &OutboundRequest,
        class: ResourceClass,
        key: &str,
    ) -> Result<(NetResponse, Source)> {
        let Some(entry) = self.cached(class, key) else {
            return self.network_first(request, class, key).await;
        };

        self.spawn_refresh(request.clone(), class, key.to_string());
        Ok(Self::served_from_cache(entry))
    }

    fn spawn_refresh(&self, request: OutboundRequest, class: ResourceClass, key: String) {
        let network = self.network.clone();
        let cache = self.cache.clone();
        let partition = self.partition.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            match fetch(network.as_ref(), &request, timeout).await {
                Ok(response) => {
                    store_response(&cache, class, &key, partition.as_deref(), &response);
                    debug!("Revalidated {}", request.url);
                }
                Err(e) => debug!("Revalidation of {} failed: {}", request.url, e),
            }
        });

        if let Ok(mut background) = self.background.lock() {
            background.retain(|h| !h.is_finished());
            background.push(handle);
        }
    }

    /// Wait for outstanding background revalidations
    pub async fn flush_background(&self) {
        let handles = match self.background.lock() {
            Ok(mut background) => std::mem::take(&mut *background),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background refresh aborted: {}", e);
            }
        }
    }

    fn offline_fallback(&self) -> Option<NetResponse> {
        let page = self.offline_page.as_deref()?;
        let url = resolve_url(&self.base_url, page).ok()?;
        let key = cache_key("GET", &url, self.partition.as_deref());
        self.cached(ResourceClass::Navigation, &key)
            .map(|entry| entry.response)
    }

    async fn handle_write(&self, request: &OutboundRequest) -> Result<Intercepted> {
        // Older writes to the same endpoint are still queued; go in behind them
        if self.queue.has_undelivered(&request.url)? {
            let item = self.queue.enqueue(request)?;
            info!(
                "{} {} queued behind earlier undelivered writes",
                request.method, request.url
            );
            return Ok(Intercepted::Queued { item_id: item.id });
        }

        match fetch(self.network.as_ref(), request, self.timeout).await {
            Ok(response) => {
                if response.is_success() {
                    // Lists may now be out of date for this identity
                    with_cache(&self.cache, |c| {
                        c.invalidate(ResourceClass::ListApi, self.partition.as_deref())
                    });
                }
                Ok(Intercepted::Response {
                    response,
                    source: Source::Network,
                })
            }
            Err(e) if e.is_retryable() => {
                let item = self.queue.enqueue(request)?;
                info!(
                    "{} {} deferred until back online: {}",
                    request.method, request.url, e
                );
                Ok(Intercepted::Queued { item_id: item.id })
            }
            Err(e) => Err(e.into()),
        }
    }
}
