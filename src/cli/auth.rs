//! Credential vault commands

use colored::Colorize;
use dialoguer::{Password, theme::ColorfulTheme};
use serde_json::json;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::{Error, Result, VaultError};
use crate::output::formatters::format_local;
use crate::output::print_json;
use crate::vault::{HostFingerprint, TokenVault};

/// Encrypt and store a bearer token for `email`
pub async fn store(ctx: &CommandContext, email: &str, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => Password::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Bearer token for {}", email))
            .interact()?,
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Other("Token must not be empty".to_string()));
    }

    let vault = ctx.vault(ctx.open_store()?, email);
    let blob = vault.store_token(token).await?;
    let expired = TokenVault::<HostFingerprint>::is_token_expired(token);

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({
            "stored": true,
            "salt_id": blob.salt_id,
            "expired": expired,
        }));
    }

    println!("{} Credential encrypted and stored", "✓".green());
    if expired {
        println!(
            "{} Token is already expired or has no readable expiry",
            "⚠".yellow()
        );
    }
    Ok(())
}

/// Report whether the stored credential can be opened, never printing it
pub async fn status(ctx: &CommandContext, email: &str) -> Result<()> {
    let vault = ctx.vault(ctx.open_store()?, email);
    let state = vault.status()?;

    let outcome = match vault.load_token().await {
        Ok(token) => {
            if TokenVault::<HostFingerprint>::is_token_expired(&token) {
                "expired"
            } else {
                "valid"
            }
        }
        Err(VaultError::NoCredential) => "missing",
        Err(VaultError::DecryptionFailed) => "unreadable",
        Err(e) => return Err(e.into()),
    };

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({
            "credential": outcome,
            "has_salt": state.has_salt,
            "salt_created_at": state.salt_created_at,
        }));
    }

    match outcome {
        "valid" => println!("{} Stored credential is valid", "✓".green()),
        "expired" => println!("{} Stored credential has expired", "⚠".yellow()),
        "missing" => {
            println!("{} No credential stored", "○".dimmed());
            println!("  → Run 'portal-offline auth store --email {}'", email);
        }
        _ => {
            println!(
                "{} Stored credential cannot be decrypted on this device",
                "✗".red()
            );
            println!("  → Sign in again");
        }
    }
    if let Some(created) = state.salt_created_at {
        println!("Vault key created {}", format_local(created).dimmed());
    }
    Ok(())
}

/// Remove all stored credentials
pub fn logout(ctx: &CommandContext) -> Result<()> {
    let removed = ctx.vault(ctx.open_store()?, "").logout()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({ "removed": removed }));
    }

    if removed > 0 {
        println!("{} Signed out, vault cleared", "✓".green());
    } else {
        println!("{} Vault was already empty", "○".dimmed());
    }
    Ok(())
}

/// Discard the vault salt so every stored credential becomes unreadable
pub fn rotate(ctx: &CommandContext) -> Result<()> {
    ctx.vault(ctx.open_store()?, "").rotate_key()?;

    if ctx.format == OutputFormat::Json {
        return print_json(&json!({ "rotated": true }));
    }

    println!("{} Vault key rotated. Sign in again to store a new credential.", "✓".green());
    Ok(())
}
