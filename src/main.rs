//! portal-offline - offline resilience layer for the knowledge portal

use clap::{CommandFactory, Parser};

mod cache;
mod cli;
mod config;
mod error;
mod interceptor;
mod network;
mod output;
mod queue;
mod store;
mod vault;

use cli::{
    AuthCommands, CacheCommands, Cli, CommandContext, Commands, GlobalOptions, QueueCommands,
};
use error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Commands::Completion { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "portal-offline",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let opts = GlobalOptions::from_cli(&cli);
    let ctx = CommandContext::new(&opts)?;

    match cli.command {
        Commands::Status => cli::status::run(&ctx),
        Commands::Fetch {
            url,
            method,
            body,
            headers,
            identity,
        } => cli::fetch::run(&ctx, &url, &method, body, &headers, identity.as_deref()).await,
        Commands::Cache(cmd) => match cmd {
            CacheCommands::Status => cli::cache::status(&ctx),
            CacheCommands::Clear => cli::cache::clear(&ctx),
            CacheCommands::Path => cli::cache::path(&ctx),
            CacheCommands::Evict => cli::cache::evict(&ctx),
            CacheCommands::Activate { version } => cli::cache::activate(&ctx, &version),
        },
        Commands::Queue(cmd) => match cmd {
            QueueCommands::List => cli::queue::list(&ctx),
            QueueCommands::Drain { watch, identity } => {
                cli::queue::drain(&ctx, watch, identity.as_deref()).await
            }
            QueueCommands::Revive { id } => cli::queue::revive(&ctx, &id),
            QueueCommands::Purge => cli::queue::purge(&ctx),
        },
        Commands::Auth(cmd) => match cmd {
            AuthCommands::Store { email, token } => cli::auth::store(&ctx, &email, token).await,
            AuthCommands::Status { email } => cli::auth::status(&ctx, &email).await,
            AuthCommands::Logout => cli::auth::logout(&ctx),
            AuthCommands::Rotate => cli::auth::rotate(&ctx),
        },
        Commands::Completion { .. } => Ok(()),
    }
}
