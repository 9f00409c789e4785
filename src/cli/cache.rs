//! Cache management commands

use chrono::Utc;
use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::formatters::{format_size, format_unix};
use crate::output::{print_json, table::format_table};

#[derive(Tabled)]
struct StoreRow {
    #[tabled(rename = "STORE")]
    store: String,
    #[tabled(rename = "TTL")]
    ttl: String,
    #[tabled(rename = "FRESH")]
    fresh: usize,
    #[tabled(rename = "EXPIRED")]
    expired: usize,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "NEWEST")]
    newest: String,
}

fn format_ttl(ttl: std::time::Duration) -> String {
    let secs = ttl.as_secs();
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}m", secs / 60)
    }
}

/// Show per-store cache statistics
pub fn status(ctx: &CommandContext) -> Result<()> {
    let cache = ctx.open_cache()?;
    let generation = cache.active_generation()?;
    let stats = cache.stats(Utc::now())?;

    if ctx.format == OutputFormat::Json {
        let stores: Vec<_> = stats
            .iter()
            .map(|s| {
                json!({
                    "store": s.class.store_name(),
                    "total_entries": s.total_entries,
                    "fresh_entries": s.fresh_entries,
                    "expired_entries": s.expired_entries,
                    "total_size_bytes": s.total_size_bytes,
                    "oldest_entry_timestamp": s.oldest_entry,
                    "newest_entry_timestamp": s.newest_entry,
                })
            })
            .collect();
        return print_json(&json!({
            "generation": generation,
            "path": cache.db_path().map(|p| p.display().to_string()),
            "stores": stores,
        }));
    }

    let rows: Vec<StoreRow> = stats
        .iter()
        .map(|s| StoreRow {
            store: s.class.store_name().to_string(),
            ttl: format_ttl(crate::cache::ExpirationPolicy::ttl(s.class)),
            fresh: s.fresh_entries,
            expired: s.expired_entries,
            size: format_size(s.total_size_bytes),
            newest: s
                .newest_entry
                .map(format_unix)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!(
        "Generation: {}",
        generation.as_deref().unwrap_or("none").cyan()
    );
    if let Some(path) = cache.db_path() {
        println!("Location:   {}", path.display());
    }
    println!();
    println!("{}", format_table(&rows));

    Ok(())
}

/// Remove all cached responses
pub fn clear(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.open_cache()?.clear_all()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({ "entries_removed": stats.entries_removed }));
    }

    if stats.entries_removed > 0 {
        println!("Cleared {} cache entries", stats.entries_removed);
    } else {
        println!("Cache was already empty");
    }
    Ok(())
}

/// Show the cache database path
pub fn path(ctx: &CommandContext) -> Result<()> {
    println!("{}", ctx.data_dir().join("cache.db").display());
    Ok(())
}

/// Remove expired entries
pub fn evict(ctx: &CommandContext) -> Result<()> {
    let removed = ctx.open_cache()?.evict_expired(Utc::now())?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({ "entries_removed": removed }));
    }

    println!("Evicted {} expired entries", removed);
    Ok(())
}

/// Cut over to a new generation
pub fn activate(ctx: &CommandContext, version: &str) -> Result<()> {
    let stats = ctx.open_cache()?.activate_generation(version)?;
    ctx.persist_cache_version(version)?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({
            "active": version,
            "previous": stats.previous,
            "entries_removed": stats.entries_removed,
        }));
    }

    match stats.previous.as_deref() {
        Some(prev) if prev == version => {
            println!("{} Generation {} already active", "○".dimmed(), version)
        }
        prev => println!(
            "{} Generation {} active (was {}), {} entries dropped",
            "✓".green(),
            version.bold(),
            prev.unwrap_or("none"),
            stats.entries_removed
        ),
    }
    Ok(())
}
