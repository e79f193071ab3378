use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stallkeep::config::{Config, StoreConfig};
use stallkeep::store::fs::FilesystemStore;
use stallkeep::store::memory::MemoryStore;
use stallkeep::{Marketplace, ReviewPipeline, Store};

/// Distribution and lifecycle control plane for the marketplace
#[derive(Parser, Debug)]
#[command(name = "stallkeep")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Store path (filesystem backend)
    #[arg(long, value_name = "PATH", global = true)]
    store_path: Option<PathBuf>,

    /// Bind address
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Port number
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Review an extracted package and print the result as JSON
    Scan {
        /// Package directory
        dir: PathBuf,
        /// Version the package manifest must declare
        #[arg(long)]
        version: String,
    },
    /// Expire trials that have run out, once
    SweepTrials,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(
        args.config.as_ref(),
        args.bind.as_deref(),
        args.port,
        args.store_path.as_ref(),
    )?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Scan { dir, version } => {
            let pipeline = ReviewPipeline::new(config.review.clone());
            let result = pipeline.review(&version, &dir);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::SweepTrials => {
            let market = Marketplace::new(open_store(&config)?, config.marketplace_settings());
            let expired = market.installations().process_expired_trials().await?;
            info!("Expired {} trial(s)", expired);
            Ok(())
        }
        Command::Serve => {
            info!("Configuration loaded: bind={}:{}", config.bind, config.port);
            let market = Arc::new(Marketplace::new(
                open_store(&config)?,
                config.marketplace_settings(),
            ));
            spawn_event_log(&market);

            // Start server
            stallkeep::api::run(config, market).await
        }
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Filesystem { path } => {
            info!("Using filesystem store at: {}", path.display());
            std::fs::create_dir_all(path)?;
            Arc::new(FilesystemStore::new(path.clone()))
        }
        StoreConfig::Memory => {
            warn!("Using in-memory store; state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

/// Log every lifecycle event until the bus closes.
fn spawn_event_log(market: &Marketplace) {
    let mut events = market.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => info!(event = event.name(), %payload, "Lifecycle event"),
                    Err(e) => warn!(event = event.name(), error = %e, "Unserializable event"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
