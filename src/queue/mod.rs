//! Durable queue of deferred writes
//!
//! Writes that could not reach the server are persisted in the `sync-queue`
//! collection and replayed by [`SyncQueue::drain`] once connectivity returns.
//! Items for the same endpoint are delivered in creation order; different
//! endpoints drain in parallel up to the configured concurrency.
//!
//! Credentials are never persisted with an item. A [`CredentialSource`]
//! supplies a current `Authorization` value when the item is replayed.

pub mod backoff;
mod drain;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::key::canonical_url;
use crate::config::QueueSettings;
use crate::error::QueueError;
use crate::network::{OutboundRequest, resolve_url};
use crate::store::{KvStore, SYNC_QUEUE};
pub use backoff::BackoffPolicy;
pub use drain::{DrainReport, drain_on_signal};

type Result<T> = std::result::Result<T, QueueError>;

/// Request headers that carry credentials; stripped before an item is stored
const CREDENTIAL_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

fn is_credential_header(name: &str) -> bool {
    CREDENTIAL_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    FailedRetryable,
    /// Terminal until an operator revives or purges the item
    DeadLettered,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in-flight",
            ItemStatus::FailedRetryable => "failed-retryable",
            ItemStatus::DeadLettered => "dead-lettered",
        };
        f.write_str(s)
    }
}

/// One deferred write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    /// Canonical target URL; items sharing it are delivered in order
    pub endpoint: String,
    /// Target URL as issued, used for replay
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, with = "crate::store::base64_opt")]
    pub body: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: ItemStatus,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    fn from_request(request: &OutboundRequest, endpoint: String, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            endpoint,
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request
                .headers
                .iter()
                .filter(|(name, _)| !is_credential_header(name))
                .cloned()
                .collect(),
            body: request.body.clone(),
            created_at: now,
            retry_count: 0,
            status: ItemStatus::Pending,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn request(&self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Number of items per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub failed_retryable: usize,
    pub dead_lettered: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.failed_retryable + self.dead_lettered
    }
}

/// Receives the outcome of a drain pass that dead-lettered items.
///
/// Called at most once per pass with every item that pass gave up on.
pub trait SyncNotifier: Send + Sync {
    fn dead_lettered(&self, items: &[SyncQueueItem]);
}

/// Supplies the credential attached to replayed writes
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current `Authorization` header value, or `None` to send without one
    async fn authorization(&self) -> Option<String>;
}

/// Notifier that reports through the log
pub struct LogNotifier;

impl SyncNotifier for LogNotifier {
    fn dead_lettered(&self, items: &[SyncQueueItem]) {
        log::warn!(
            "{} queued change(s) could not be synced and need attention",
            items.len()
        );
    }
}

pub struct SyncQueue {
    store: Arc<KvStore>,
    backoff: BackoffPolicy,
    concurrency: usize,
    /// Ids claimed by a running drain
    in_flight: Arc<Mutex<HashSet<String>>>,
    notifier: Arc<dyn SyncNotifier>,
    credentials: Option<Arc<dyn CredentialSource>>,
    /// Origin that relative URLs resolve against when grouping
    base_url: Option<Url>,
}

impl SyncQueue {
    pub fn new(store: Arc<KvStore>, settings: &QueueSettings) -> Self {
        Self {
            store,
            backoff: BackoffPolicy::from_settings(settings),
            concurrency: settings.concurrency.max(1),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            notifier: Arc::new(LogNotifier),
            credentials: None,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Persist a write for later delivery
    pub fn enqueue(&self, request: &OutboundRequest) -> Result<SyncQueueItem> {
        let endpoint = self.endpoint_for(&request.url);
        let item = SyncQueueItem::from_request(request, endpoint, Utc::now());
        self.save(&item)?;
        log::info!(
            "Queued {} {} for sync (id {})",
            item.method,
            item.endpoint,
            item.id
        );
        Ok(item)
    }

    /// Whether a write to `url` is still waiting for delivery
    pub fn has_undelivered(&self, url: &str) -> Result<bool> {
        let endpoint = self.endpoint_for(url);
        Ok(self
            .list()?
            .iter()
            .any(|item| item.status != ItemStatus::DeadLettered && item.endpoint == endpoint))
    }

    /// Ordering key for a URL: absolute, fragment-free, query sorted
    fn endpoint_for(&self, raw: &str) -> String {
        let resolved = match &self.base_url {
            Some(base) => resolve_url(base, raw).ok(),
            None => Url::parse(raw).ok(),
        };
        match resolved {
            Some(url) => canonical_url(&url),
            None => raw.split('#').next().unwrap_or(raw).to_string(),
        }
    }

    /// All items in creation order
    pub fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let mut items: Vec<SyncQueueItem> = self
            .store
            .list(SYNC_QUEUE)?
            .into_iter()
            .map(|(_, item)| item)
            .collect();
        items.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(items)
    }

    pub fn get(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        Ok(self.store.get(SYNC_QUEUE, id)?)
    }

    pub fn counts(&self) -> Result<QueueCounts> {
        let mut counts = QueueCounts::default();
        for item in self.list()? {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InFlight => counts.in_flight += 1,
                ItemStatus::FailedRetryable => counts.failed_retryable += 1,
                ItemStatus::DeadLettered => counts.dead_lettered += 1,
            }
        }
        Ok(counts)
    }

    /// Put a dead-lettered item back in line. The retry count is kept.
    pub fn revive(&self, id: &str) -> Result<SyncQueueItem> {
        let mut item = self
            .get(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if item.status != ItemStatus::DeadLettered {
            return Err(QueueError::NotDeadLettered(id.to_string()));
        }

        item.status = ItemStatus::Pending;
        item.next_attempt_at = None;
        self.save(&item)?;
        log::info!("Revived queue item {}", id);
        Ok(item)
    }

    /// Delete every dead-lettered item
    pub fn purge_dead_letters(&self) -> Result<usize> {
        let mut removed = 0;
        for item in self.list()? {
            if item.status == ItemStatus::DeadLettered && self.store.delete(SYNC_QUEUE, &item.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn save(&self, item: &SyncQueueItem) -> Result<()> {
        self.store.put(SYNC_QUEUE, &item.id, item)?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.store.delete(SYNC_QUEUE, id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SyncQueue {
        SyncQueue::new(Arc::new(KvStore::in_memory().unwrap()), &QueueSettings::default())
    }

    fn portal_queue(store: Arc<KvStore>) -> SyncQueue {
        SyncQueue::new(store, &QueueSettings::default())
            .with_base_url(Url::parse("https://portal.example.com").unwrap())
    }

    #[test]
    fn test_enqueue_persists_pending_item() {
        let queue = queue();
        let request = OutboundRequest::new("post", "/api/docs")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"title":"draft"}"#);

        let item = queue.enqueue(&request).unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.retry_count, 0);

        let stored = queue.get(&item.id).unwrap().unwrap();
        assert_eq!(stored, item);
        assert_eq!(stored.request(), request);
    }

    #[test]
    fn test_credentials_are_never_persisted() {
        let store = Arc::new(KvStore::in_memory().unwrap());
        let queue = portal_queue(store.clone());
        let request = OutboundRequest::new("PUT", "/api/docs/1")
            .with_header("Authorization", "Bearer secret-token")
            .with_header("cookie", "session=secret-cookie")
            .with_header("Proxy-Authorization", "Basic secret-proxy")
            .with_header("Content-Type", "application/json")
            .with_body("{}");

        let item = queue.enqueue(&request).unwrap();
        assert_eq!(
            item.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );

        let raw: serde_json::Value = store.get(SYNC_QUEUE, &item.id).unwrap().unwrap();
        let raw = raw.to_string();
        assert!(!raw.contains("secret"), "{}", raw);
        assert!(!raw.to_ascii_lowercase().contains("authorization"));
    }

    #[test]
    fn test_endpoint_is_canonical_and_url_kept_for_replay() {
        let queue = portal_queue(Arc::new(KvStore::in_memory().unwrap()));

        let relative = queue.enqueue(&OutboundRequest::new("PUT", "/api/docs/1")).unwrap();
        let absolute = queue
            .enqueue(&OutboundRequest::new("PUT", "https://PORTAL.example.com/api/docs/1#x"))
            .unwrap();
        let query = queue
            .enqueue(&OutboundRequest::new("PUT", "/api/search?b=2&a=1"))
            .unwrap();

        assert_eq!(relative.endpoint, "https://portal.example.com/api/docs/1");
        assert_eq!(absolute.endpoint, relative.endpoint);
        assert_eq!(query.endpoint, "https://portal.example.com/api/search?a=1&b=2");
        assert_eq!(relative.request().url, "/api/docs/1");
        assert_eq!(absolute.request().url, "https://PORTAL.example.com/api/docs/1#x");
    }

    #[test]
    fn test_has_undelivered_matches_any_spelling() {
        let queue = portal_queue(Arc::new(KvStore::in_memory().unwrap()));
        assert!(!queue.has_undelivered("/api/docs/1").unwrap());

        let item = queue.enqueue(&OutboundRequest::new("PUT", "/api/docs/1")).unwrap();
        assert!(queue.has_undelivered("/api/docs/1").unwrap());
        assert!(
            queue
                .has_undelivered("https://portal.example.com/api/docs/1#edit")
                .unwrap()
        );
        assert!(!queue.has_undelivered("/api/docs/2").unwrap());

        // Dead letters no longer hold the endpoint
        let mut dead = item;
        dead.status = ItemStatus::DeadLettered;
        queue.save(&dead).unwrap();
        assert!(!queue.has_undelivered("/api/docs/1").unwrap());
    }

    #[test]
    fn test_endpoint_without_base_strips_fragment() {
        let queue = queue();
        let item = queue.enqueue(&OutboundRequest::new("POST", "/api/docs#new")).unwrap();
        assert_eq!(item.endpoint, "/api/docs");
        assert_eq!(item.url, "/api/docs#new");
    }

    #[test]
    fn test_list_is_creation_ordered() {
        let queue = queue();
        let a = queue.enqueue(&OutboundRequest::new("POST", "/api/b")).unwrap();
        let b = queue.enqueue(&OutboundRequest::new("POST", "/api/a")).unwrap();

        let ids: Vec<String> = queue.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_revive_requires_dead_letter() {
        let queue = queue();
        let item = queue.enqueue(&OutboundRequest::new("PUT", "/api/docs/1")).unwrap();

        assert!(matches!(
            queue.revive(&item.id),
            Err(QueueError::NotDeadLettered(_))
        ));
        assert!(matches!(queue.revive("missing"), Err(QueueError::NotFound(_))));

        let mut dead = item.clone();
        dead.status = ItemStatus::DeadLettered;
        dead.retry_count = 5;
        queue.save(&dead).unwrap();

        let revived = queue.revive(&item.id).unwrap();
        assert_eq!(revived.status, ItemStatus::Pending);
        assert_eq!(revived.retry_count, 5);
    }

    #[test]
    fn test_purge_only_removes_dead_letters() {
        let queue = queue();
        let keep = queue.enqueue(&OutboundRequest::new("POST", "/api/a")).unwrap();
        let mut dead = queue.enqueue(&OutboundRequest::new("POST", "/api/b")).unwrap();
        dead.status = ItemStatus::DeadLettered;
        queue.save(&dead).unwrap();

        assert_eq!(queue.purge_dead_letters().unwrap(), 1);
        let remaining = queue.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
    }

    #[test]
    fn test_counts_by_status() {
        let queue = queue();
        queue.enqueue(&OutboundRequest::new("POST", "/api/a")).unwrap();
        let mut dead = queue.enqueue(&OutboundRequest::new("POST", "/api/b")).unwrap();
        dead.status = ItemStatus::DeadLettered;
        queue.save(&dead).unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.dead_lettered, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::FailedRetryable).unwrap(),
            "\"failed_retryable\""
        );
        assert_eq!(ItemStatus::DeadLettered.to_string(), "dead-lettered");
    }
}
