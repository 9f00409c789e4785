//! Delivery of queued writes
//!
//! A pass groups items by endpoint. Each group is claimed as a whole so an
//! overlapping pass skips it instead of sending the same item twice. Groups
//! run concurrently; inside a group items go strictly in creation order and
//! a transient failure halts the group until its head is due again.
//!
//! The credential is looked up once per pass and attached to every replayed
//! item, since stored items carry none.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::{ItemStatus, SyncQueue, SyncQueueItem};
use crate::error::QueueError;
use crate::network::{NetResponse, Network};

type Result<T> = std::result::Result<T, QueueError>;

type GroupFuture<'a> = Pin<Box<dyn Future<Output = Result<GroupOutcome>> + Send + 'a>>;

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    /// Items left alone because another pass holds their endpoint
    pub skipped_in_flight: usize,
    /// Items not attempted: not yet due, or queued behind a head that is not
    pub not_due: usize,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rescheduled + self.dead_lettered
    }

    fn absorb(&mut self, other: DrainReport) {
        self.delivered += other.delivered;
        self.rescheduled += other.rescheduled;
        self.dead_lettered += other.dead_lettered;
        self.skipped_in_flight += other.skipped_in_flight;
        self.not_due += other.not_due;
    }
}

#[derive(Default)]
struct GroupOutcome {
    report: DrainReport,
    dead: Vec<SyncQueueItem>,
}

/// Ids held by a running group; released on drop, including on cancellation
struct Claim {
    set: Arc<Mutex<HashSet<String>>>,
    ids: Vec<String>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            set.remove(id);
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl SyncQueue {
    /// Attempt delivery of every due item
    pub async fn drain<N: Network + ?Sized>(&self, network: &N) -> Result<DrainReport> {
        self.drain_at(network, Utc::now()).await
    }

    /// Drain pass with an explicit clock
    pub async fn drain_at<N: Network + ?Sized>(
        &self,
        network: &N,
        now: DateTime<Utc>,
    ) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut ready = Vec::new();

        for group in self.group_by_endpoint()? {
            match self.claim(&group) {
                Some(claim) => ready.push((claim, group)),
                None => report.skipped_in_flight += group.len(),
            }
        }

        if ready.is_empty() {
            return Ok(report);
        }

        debug!(
            "Draining {} endpoint(s) with max {} concurrent",
            ready.len(),
            self.concurrency
        );

        let authorization = match &self.credentials {
            Some(source) => source.authorization().await,
            None => None,
        };
        if self.credentials.is_some() && authorization.is_none() {
            warn!("No credential available; replaying queued writes without one");
        }
        let authorization = authorization.as_deref();

        let mut futures: FuturesUnordered<GroupFuture<'_>> = FuturesUnordered::new();
        let mut pending = ready.into_iter();

        for (claim, group) in pending.by_ref().take(self.concurrency) {
            futures.push(self.group_future(network, claim, group, authorization, now));
        }

        let mut dead = Vec::new();
        let mut first_error = None;

        // Keep going on errors so no group is abandoned between send and bookkeeping
        while let Some(result) = futures.next().await {
            match result {
                Ok(outcome) => {
                    report.absorb(outcome.report);
                    dead.extend(outcome.dead);
                }
                Err(e) => {
                    warn!("Queue bookkeeping failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }

            if let Some((claim, group)) = pending.next() {
                futures.push(self.group_future(network, claim, group, authorization, now));
            }
        }

        report.dead_lettered = dead.len();
        if !dead.is_empty() {
            self.notifier.dead_lettered(&dead);
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        if report.attempted() > 0 {
            info!(
                "Drain: {} delivered, {} rescheduled, {} dead-lettered",
                report.delivered, report.rescheduled, report.dead_lettered
            );
        }
        Ok(report)
    }

    /// Undelivered items grouped by endpoint, both levels in creation order
    fn group_by_endpoint(&self) -> Result<Vec<Vec<SyncQueueItem>>> {
        let mut groups: Vec<Vec<SyncQueueItem>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for item in self.list()? {
            if item.status == ItemStatus::DeadLettered {
                continue;
            }
            match index.get(&item.endpoint) {
                Some(&i) => groups[i].push(item),
                None => {
                    index.insert(item.endpoint.clone(), groups.len());
                    groups.push(vec![item]);
                }
            }
        }

        Ok(groups)
    }

    fn claim(&self, group: &[SyncQueueItem]) -> Option<Claim> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if group.iter().any(|item| set.contains(&item.id)) {
            return None;
        }

        let ids: Vec<String> = group.iter().map(|item| item.id.clone()).collect();
        set.extend(ids.iter().cloned());

        Some(Claim {
            set: self.in_flight.clone(),
            ids,
        })
    }

    fn group_future<'a, N: Network + ?Sized>(
        &'a self,
        network: &'a N,
        claim: Claim,
        group: Vec<SyncQueueItem>,
        authorization: Option<&'a str>,
        now: DateTime<Utc>,
    ) -> GroupFuture<'a> {
        Box::pin(async move {
            let _claim = claim;
            self.drain_group(network, group, authorization, now).await
        })
    }

    async fn drain_group<N: Network + ?Sized>(
        &self,
        network: &N,
        group: Vec<SyncQueueItem>,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GroupOutcome> {
        let mut outcome = GroupOutcome::default();
        let mut items = group.into_iter();

        while let Some(mut item) = items.next() {
            if !item.is_due(now) {
                outcome.report.not_due += 1 + items.len();
                break;
            }

            item.status = ItemStatus::InFlight;
            self.save(&item)?;

            let mut request = item.request();
            if let Some(value) = authorization {
                request = request.with_header("Authorization", value);
            }

            let result = network.send(&request).await.and_then(NetResponse::check);

            match result {
                Ok(response) => {
                    self.remove(&item.id)?;
                    outcome.report.delivered += 1;
                    debug!(
                        "Delivered {} {} ({})",
                        item.method, item.endpoint, response.status
                    );
                }
                Err(err) if err.is_retryable() => {
                    item.retry_count += 1;
                    item.last_error = Some(err.to_string());

                    if self.backoff.is_exhausted(item.retry_count) {
                        self.dead_letter(&mut item)?;
                        outcome.dead.push(item);
                    } else {
                        let mut delay = self.backoff.delay(item.retry_count);
                        if let Some(wait) = err.retry_after() {
                            delay = delay.max(wait);
                        }
                        item.status = ItemStatus::FailedRetryable;
                        item.next_attempt_at = Some(after(now, delay));
                        self.save(&item)?;
                        outcome.report.rescheduled += 1;
                        debug!(
                            "Retry {} of {} {} in {:?}: {}",
                            item.retry_count, item.method, item.endpoint, delay, err
                        );
                    }

                    // Later writes to this endpoint must not overtake the head
                    outcome.report.not_due += items.len();
                    break;
                }
                Err(err) => {
                    item.retry_count += 1;
                    item.last_error = Some(err.to_string());
                    self.dead_letter(&mut item)?;
                    outcome.dead.push(item);
                }
            }
        }

        Ok(outcome)
    }

    fn dead_letter(&self, item: &mut SyncQueueItem) -> Result<()> {
        item.status = ItemStatus::DeadLettered;
        item.next_attempt_at = None;
        self.save(item)?;
        warn!(
            "Dead-lettered {} {} after {} attempt(s): {}",
            item.method,
            item.endpoint,
            item.retry_count,
            item.last_error.as_deref().unwrap_or("unknown error")
        );
        Ok(())
    }
}

/// Drain whenever connectivity returns and every `interval` while online.
///
/// Runs until the sending side of `online` is dropped and returns the number
/// of passes made.
pub async fn drain_on_signal<N: Network + ?Sized>(
    queue: &SyncQueue,
    network: &N,
    mut online: watch::Receiver<bool>,
    interval: Duration,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut passes = 0;

    loop {
        tokio::select! {
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let is_online = *online.borrow_and_update();
        if !is_online {
            continue;
        }

        match queue.drain(network).await {
            Ok(_) => passes += 1,
            Err(e) => warn!("Drain pass failed: {}", e),
        }
    }

    passes
}
