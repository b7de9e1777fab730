//! Holdings - balance aggregation and badge asset cache
//!
//! Main entry point for the command-line tool

mod wiring;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use holdings_asset_cache::AssetPhase;
use holdings_core::{AssetId, HoldingsConfig, OwnerId};

#[derive(Parser)]
#[command(name = "holdings")]
#[command(about = "Aggregate owner balances and resolve badge assets", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON); HOLDINGS__* env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate balances for an owner across all configured sources
    Balances {
        owner: String,
    },
    /// Resolve a badge asset through the local cache
    Asset {
        id: String,

        /// Drop the cached copy and fetch again
        #[arg(long)]
        refresh: bool,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.json_logs);

    info!("Starting holdings v{}", env!("CARGO_PKG_VERSION"));

    let config = HoldingsConfig::load(args.config.as_deref())?;
    let client = wiring::http_client(&config)?;

    match args.command {
        Command::Balances { owner } => {
            let owner = OwnerId::new(owner);
            let aggregator = wiring::aggregator(&config);
            let sources = wiring::source_set_for(&config, &client, &aggregator, &owner).await?;

            let result = aggregator.aggregate(Some(&owner), &sources).await;
            for key in result.failed_sources() {
                warn!("Source {} failed", key);
            }
            println!("{}", serde_json::to_string_pretty(&json!({ "owner": owner, "result": result }))?);
        }
        Command::Asset { id, refresh } => {
            let id = AssetId::new(id);
            let resolver = wiring::asset_resolver(&config, &client)?;

            let mut phases: Vec<AssetPhase> = Vec::new();
            if refresh && resolver.cache().invalidate(&id)? {
                info!("Dropped cached copy of asset {}", id);
            }
            let resolved = resolver.resolve_observed(&id, &mut |p| phases.push(p)).await?;
            let payload = resolved
                .handle
                .payload()
                .context("handle revoked before it was read")?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "id": id,
                    "provenance": resolved.provenance,
                    "handle": resolved.handle.url(),
                    "bytes": payload.len(),
                    "content_type": payload.content_type,
                    "name": resolved.metadata.name,
                    "phases": phases,
                }))?
            );
            resolved.handle.release();
        }
    }

    Ok(())
}
