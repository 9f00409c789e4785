//! CLI command definitions

use clap::{Parser, Subcommand};
pub use clap_complete::Shell;

pub mod args;
pub mod auth;
pub mod cache;
pub mod context;
pub mod fetch;
pub mod queue;
pub mod status;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

use crate::config::Environment;

/// Offline resilience layer for the knowledge portal
#[derive(Parser, Debug)]
#[command(name = "portal-offline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "PORTAL_OFFLINE_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "PORTAL_OFFLINE_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "PORTAL_OFFLINE_DEBUG", hide_env = true)]
    pub debug: bool,

    /// Portal origin (overrides api_base_url)
    #[arg(long, global = true, env = "PORTAL_OFFLINE_API_HOST", hide_env = true)]
    pub api_host: Option<String>,

    /// Deployment environment (overrides the config file)
    #[arg(
        long,
        global = true,
        env = "PORTAL_OFFLINE_ENVIRONMENT",
        hide_env = true,
        value_enum
    )]
    pub environment: Option<Environment>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show environment, cache, queue and vault state
    Status,

    /// Send one request through the interception layer
    Fetch {
        /// Request URL, absolute or relative to the portal origin
        url: String,

        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// Request body
        #[arg(long, short = 'd')]
        body: Option<String>,

        /// Extra header, "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Identity whose cache partition to use
        #[arg(long = "as")]
        identity: Option<String>,
    },

    /// Manage the local response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Inspect and drain the offline write queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Manage the encrypted credential vault
    #[command(subcommand)]
    Auth(AuthCommands),

    /// Generate shell completions
    #[command(after_help = "\
Examples:
  bash:   portal-offline completion bash > /etc/bash_completion.d/portal-offline
  zsh:    portal-offline completion zsh > \"${fpath[1]}/_portal-offline\"
  fish:   portal-offline completion fish > ~/.config/fish/completions/portal-offline.fish")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show per-store statistics
    Status,

    /// Remove all cached responses
    Clear,

    /// Show the cache database location
    Path,

    /// Remove expired entries
    Evict,

    /// Switch to a new cache generation, dropping the old one
    Activate {
        /// Generation tag, e.g. the deployed release
        version: String,
    },
}

/// Offline queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queued writes
    List,

    /// Deliver due writes now
    Drain {
        /// Keep running: probe connectivity and drain every SECS seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,

        /// Attach the stored credential of this identity to replayed writes
        #[arg(long = "as", value_name = "EMAIL")]
        identity: Option<String>,
    },

    /// Put a dead-lettered write back in line
    Revive {
        /// Queue item id
        id: String,
    },

    /// Delete all dead-lettered writes
    Purge,
}

/// Credential vault subcommands
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Encrypt and store a bearer token
    Store {
        /// Identity the token belongs to
        #[arg(long)]
        email: String,

        /// Token to store (prompted when omitted)
        #[arg(long, env = "PORTAL_OFFLINE_TOKEN", hide_env = true)]
        token: Option<String>,
    },

    /// Check the stored credential without printing it
    Status {
        #[arg(long)]
        email: String,
    },

    /// Remove every stored credential
    Logout,

    /// Discard the vault salt; stored credentials become unreadable
    Rotate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fetch_arguments() {
        let cli = Cli::parse_from([
            "portal-offline",
            "fetch",
            "-X",
            "post",
            "-d",
            "{}",
            "-H",
            "Content-Type: application/json",
            "/api/docs",
        ]);

        match cli.command {
            Commands::Fetch {
                url,
                method,
                body,
                headers,
                identity,
            } => {
                assert_eq!(url, "/api/docs");
                assert_eq!(method, "post");
                assert_eq!(body.as_deref(), Some("{}"));
                assert_eq!(headers, vec!["Content-Type: application/json"]);
                assert!(identity.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_queue_drain_watch() {
        let cli = Cli::parse_from(["portal-offline", "queue", "drain", "--watch", "30"]);
        assert!(matches!(
            cli.command,
            Commands::Queue(QueueCommands::Drain {
                watch: Some(30),
                identity: None,
            })
        ));
    }

    #[test]
    fn test_queue_drain_as_identity() {
        let cli = Cli::parse_from([
            "portal-offline",
            "queue",
            "drain",
            "--as",
            "alice@example.com",
        ]);
        match cli.command {
            Commands::Queue(QueueCommands::Drain { watch, identity }) => {
                assert!(watch.is_none());
                assert_eq!(identity.as_deref(), Some("alice@example.com"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
