//! webstats - operator CLI for the placeholder cache and merged stats

mod cli;
mod usercache;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use webstats_core::config::CONFIG_FILE_NAME;
use webstats_core::{BackendKind, Config, HostThread, Webstats};

#[derive(Parser)]
#[command(
    name = "webstats",
    version,
    about = "Inspect and maintain webstats data without a running server",
    long_about = "Reads the webstats data directory (config.json, placeholders.csv or the\n\
                  placeholder database) and the server's usercache.json to answer operator\n\
                  requests offline.\n\
                  \n\
                  Examples:\n\
                    webstats stats                   # Print merged stats\n\
                    webstats dump                    # Show every cached placeholder\n\
                    webstats migrate database        # Move the cache to the database\n\
                    webstats delete Notch            # Forget a player's cached values\n\
                    webstats export                  # Append changed stats to stats.csv\n\
                  \n\
                  Environment Variables:\n\
                    WEBSTATS_DATA_DIR                # Data directory\n\
                    WEBSTATS_CONFIG                  # Configuration file\n\
                    WEBSTATS_LOG                     # Log filter (default: info)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Data directory (default: platform data dir + /webstats)
    #[arg(long, env = "WEBSTATS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: <data-dir>/config.json)
    #[arg(long, env = "WEBSTATS_CONFIG")]
    config: Option<PathBuf>,

    /// Server user cache used to resolve player names
    #[arg(long)]
    usercache: Option<PathBuf>,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print merged stats from every configured source
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print every cached placeholder value and the storage status
    Dump {
        /// Plain text instead of a table
        #[arg(long)]
        raw: bool,
    },
    /// Move the placeholder cache to another storage backend (csv|database)
    Migrate { to: String },
    /// Remove cached placeholder values of a player, by UUID or name
    Delete { player: String },
    /// Append changed stats to stats.csv
    Export,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("WEBSTATS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .or_else(|| dirs::data_dir().map(|d| d.join("webstats")))
        .context("Could not determine data directory")?;
    let config_path = cli.config.unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    // plugins/WebStats -> server root
    let usercache = cli.usercache.unwrap_or_else(|| {
        data_dir
            .parent()
            .and_then(|plugins| plugins.parent())
            .map(|root| root.join("usercache.json"))
            .unwrap_or_else(|| PathBuf::from("usercache.json"))
    });

    let config = Config::load(&config_path, &data_dir)
        .await
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;

    let host = usercache::load_offline_host(&usercache).await?;
    let thread = HostThread::spawn(host)?;

    let webstats = match Webstats::start(config, thread.handle()).await {
        Ok(webstats) => webstats,
        Err(e) => match e.config_field() {
            Some(field) => bail!("{} (check '{}' in {})", e, field, config_path.display()),
            None => return Err(e).context("Failed to start webstats"),
        },
    };

    let result = run(&webstats, cli.command, cli.no_color).await;
    thread.shutdown();
    result
}

async fn run(webstats: &Webstats, command: Command, no_color: bool) -> Result<()> {
    match command {
        Command::Stats { json } => {
            let stats = webstats.get_stats().await.context("Failed to collect stats")?;
            println!("{}", cli::format_stats(&stats, json, no_color));
        }
        Command::Dump { raw } => {
            if raw {
                println!("{}", webstats.debug().await?);
            } else {
                let entries = webstats.debug_entries().await?;
                let status = match webstats.placeholders().and_then(|p| p.cache()) {
                    Some(cache) => Some(cache.status().await?),
                    None => None,
                };
                println!(
                    "{}",
                    cli::format_debug_entries(&entries, status.as_ref(), no_color)
                );
            }
        }
        Command::Migrate { to } => {
            let kind: BackendKind = to.parse()?;
            webstats
                .migrate(kind)
                .await
                .with_context(|| format!("Migration to {} failed, storage unchanged", kind))?;
            println!("Migrated placeholder storage to {}", kind);
        }
        Command::Delete { player } => {
            if webstats.delete_player(&player).await? {
                webstats.save().await.context("Failed to save placeholder storage")?;
                println!("Removed cached placeholders of {}", player);
            } else {
                println!("No cached placeholders for {}", player);
            }
        }
        Command::Export => {
            let rows = webstats.export().await.context("Export failed")?;
            println!("Exported {} changed entries", rows);
        }
    }
    Ok(())
}
