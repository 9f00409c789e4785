//! Offline queue commands

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tabled::Tabled;
use tokio::sync::watch;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::network::{Network, OutboundRequest};
use crate::output::formatters::{format_local, format_until, truncate};
use crate::output::{print_json, table::format_table};
use crate::queue::{
    DrainReport, ItemStatus, SyncNotifier, SyncQueue, SyncQueueItem, drain_on_signal,
};

/// Prints one consolidated warning per drain pass
pub struct ConsoleNotifier;

impl SyncNotifier for ConsoleNotifier {
    fn dead_lettered(&self, items: &[SyncQueueItem]) {
        eprintln!(
            "{} {} change(s) could not be synced and were set aside:",
            "⚠".yellow(),
            items.len()
        );
        for item in items {
            eprintln!(
                "  {} {} {}",
                item.method,
                item.endpoint,
                item.last_error.as_deref().unwrap_or("").dimmed()
            );
        }
        eprintln!("  → Review with 'portal-offline queue list'");
    }
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "METHOD")]
    method: String,
    #[tabled(rename = "ENDPOINT")]
    endpoint: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RETRIES")]
    retries: u32,
    #[tabled(rename = "NEXT")]
    next: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

fn colored_status(status: ItemStatus) -> String {
    let text = status.to_string();
    match status {
        ItemStatus::Pending => text.cyan().to_string(),
        ItemStatus::InFlight => text.blue().to_string(),
        ItemStatus::FailedRetryable => text.yellow().to_string(),
        ItemStatus::DeadLettered => text.red().to_string(),
    }
}

fn open_queue(ctx: &CommandContext) -> Result<Arc<SyncQueue>> {
    Ok(Arc::new(ctx.queue(ctx.open_store()?, Arc::new(ConsoleNotifier))?))
}

/// List queued writes
pub fn list(ctx: &CommandContext) -> Result<()> {
    let items = open_queue(ctx)?.list()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&items);
    }

    let now = Utc::now();
    let rows: Vec<ItemRow> = items
        .iter()
        .map(|item| ItemRow {
            id: item.id.clone(),
            method: item.method.clone(),
            endpoint: truncate(&item.endpoint, 48),
            status: match ctx.format {
                OutputFormat::Pretty => colored_status(item.status),
                _ => item.status.to_string(),
            },
            retries: item.retry_count,
            next: match (item.status, item.next_attempt_at) {
                (ItemStatus::DeadLettered, _) => "-".to_string(),
                (_, Some(at)) => format_until(at, now),
                (_, None) => "now".to_string(),
            },
            created: format_local(item.created_at),
        })
        .collect();

    println!("{}", format_table(&rows));
    Ok(())
}

fn print_report(format: OutputFormat, report: &DrainReport) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    if report.attempted() == 0 && report.not_due == 0 && report.skipped_in_flight == 0 {
        println!("{} Queue is empty", "○".dimmed());
        return Ok(());
    }

    println!("{} {} delivered", "✓".green(), report.delivered);
    if report.rescheduled > 0 {
        println!("{} {} rescheduled", "↻".yellow(), report.rescheduled);
    }
    if report.dead_lettered > 0 {
        println!("{} {} dead-lettered", "✗".red(), report.dead_lettered);
    }
    if report.not_due > 0 {
        println!("{} {} waiting for backoff", "○".dimmed(), report.not_due);
    }
    if report.skipped_in_flight > 0 {
        println!(
            "{} {} held by another drain",
            "○".dimmed(),
            report.skipped_in_flight
        );
    }
    Ok(())
}

/// Deliver due writes, once or continuously.
///
/// With an identity, the credential stored for it is attached to every
/// replayed write; otherwise writes go out without one.
pub async fn drain(
    ctx: &CommandContext,
    watch_secs: Option<u64>,
    identity: Option<&str>,
) -> Result<()> {
    let store = ctx.open_store()?;
    let mut queue = ctx.queue(store.clone(), Arc::new(ConsoleNotifier))?;
    if let Some(email) = identity {
        queue = queue.with_credentials(Arc::new(ctx.vault(store, email)));
    }
    let queue = Arc::new(queue);
    let network = ctx.network()?;

    if let Some(secs) = watch_secs {
        return watch_and_drain(queue, network, Duration::from_secs(secs.max(1))).await;
    }

    let spinner = (ctx.format != OutputFormat::Json).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Draining offline queue...");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let result = queue.drain(network.as_ref()).await;

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    print_report(ctx.format, &result?)
}

/// Probe the origin and drain on reconnect and on every tick while online
async fn watch_and_drain<N: Network + 'static>(
    queue: Arc<SyncQueue>,
    network: Arc<N>,
    interval: Duration,
) -> Result<()> {
    let (tx, rx) = watch::channel(false);

    let probe = {
        let network = network.clone();
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let online = network.send(&OutboundRequest::new("HEAD", "/")).await.is_ok();
                tx.send_if_modified(|current| {
                    if *current == online {
                        return false;
                    }
                    log::info!("Connectivity {}", if online { "restored" } else { "lost" });
                    *current = online;
                    true
                });
            }
        }
    };

    println!(
        "Watching connectivity every {}s (Ctrl-C to stop)",
        interval.as_secs()
    );

    tokio::select! {
        _ = probe => {}
        passes = drain_on_signal(&queue, network.as_ref(), rx, interval) => {
            log::debug!("Drain loop ended after {} passes", passes);
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}

/// Put a dead-lettered write back in line
pub fn revive(ctx: &CommandContext, id: &str) -> Result<()> {
    let item = open_queue(ctx)?.revive(id)?;

    if ctx.format == OutputFormat::Json {
        return print_json(&item);
    }

    println!(
        "{} {} {} is pending again (attempts so far: {})",
        "✓".green(),
        item.method,
        item.endpoint,
        item.retry_count
    );
    Ok(())
}

/// Delete all dead-lettered writes
pub fn purge(ctx: &CommandContext) -> Result<()> {
    let removed = open_queue(ctx)?.purge_dead_letters()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({ "removed": removed }));
    }

    println!("Removed {} dead-lettered item(s)", removed);
    Ok(())
}
