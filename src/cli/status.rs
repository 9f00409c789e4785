//! Status command implementation

use chrono::Utc;
use colored::Colorize;
use serde_json::json;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::output::formatters::format_local;
use crate::output::print_json;
use crate::queue::{LogNotifier, QueueCounts};

/// Display environment, cache, queue and vault state
pub fn run(ctx: &CommandContext) -> Result<()> {
    let config_path = ctx.config_path();
    let cache = ctx.open_cache()?;
    let generation = cache.active_generation()?;
    let stats = cache.stats(Utc::now())?;
    let entries: usize = stats.iter().map(|s| s.total_entries).sum();
    let expired: usize = stats.iter().map(|s| s.expired_entries).sum();

    let store = ctx.open_store()?;
    let counts = ctx
        .queue(store.clone(), std::sync::Arc::new(LogNotifier))?
        .counts()?;
    let vault = ctx.vault(store, "").status()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({
            "environment": ctx.config.environment.as_str(),
            "api_base_url": ctx.config.api_base_url,
            "config_path": config_path.display().to_string(),
            "data_dir": ctx.data_dir().display().to_string(),
            "cache": {
                "generation": generation,
                "entries": entries,
                "expired": expired,
            },
            "queue": counts,
            "vault": {
                "has_salt": vault.has_salt,
                "has_credential": vault.has_credential,
            },
        }));
    }

    println!("{}\n", "Portal Offline Status".bold());
    println!("Config file: {}", config_path.display().to_string().cyan());
    println!("Data dir:    {}", ctx.data_dir().display().to_string().cyan());
    let environment = ctx.config.environment.as_str();
    println!(
        "Environment: {} ({})",
        if ctx.config.environment.is_production() {
            environment.green().bold()
        } else {
            environment.yellow().bold()
        },
        ctx.config.api_base_url
    );
    println!();

    match generation {
        Some(ref tag) => println!(
            "{} Cache generation {}: {} entries ({} expired)",
            "✓".green(),
            tag.bold(),
            entries,
            expired
        ),
        None => println!("{} No cache generation active", "○".dimmed()),
    }

    print_queue(&counts);

    if vault.has_credential {
        println!("{} Credential stored", "✓".green());
    } else {
        println!("{} No credential stored", "○".dimmed());
    }
    if let Some(created) = vault.salt_created_at {
        println!("  Vault key created {}", format_local(created).dimmed());
    }

    println!();
    Ok(())
}

fn print_queue(counts: &QueueCounts) {
    if counts.total() == 0 {
        println!("{} Offline queue empty", "✓".green());
        return;
    }

    println!(
        "{} Offline queue: {} pending, {} retrying, {} in flight",
        "⚠".yellow(),
        counts.pending,
        counts.failed_retryable,
        counts.in_flight
    );
    if counts.dead_lettered > 0 {
        println!(
            "{} {} change(s) could not be synced",
            "✗".red(),
            counts.dead_lettered
        );
        println!("  → Run 'portal-offline queue list' to review");
    }
}
