//! Audit Node Daemon
//!
//! Serves the farmer API and keeps the chunk inventory stocked.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (HTTP server + capacity maintainer + GC)
//! audit-node
//!
//! # Start with custom config
//! audit-node --config /path/to/config.toml
//!
//! # Start with custom HTTP port and storage directory
//! audit-node --http-port 8080 --storage-dir /data/audit
//!
//! # Serve only, without generating inventory
//! audit-node --no-maintain
//!
//! # One-shot operator tasks
//! audit-node --import-whitelist balances.csv
//! audit-node --clear-chunks
//! ```

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use audit_node::{
    whitelist, CapacityMaintainer, Clock, Config, DigestVerifier, GarbageCollector, Geolocator,
    HttpServer, NodeDb, NullGeolocator, Services, SystemClock, TableGeolocator, TagStore, Verifier,
};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "audit-node")]
#[command(about = "Proof-of-storage verification node")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "AUDIT_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (database, tags, verifier key)
    #[arg(long, env = "AUDIT_NODE_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "AUDIT_NODE_HTTP_PORT")]
    http_port: Option<u16>,

    /// Disable the capacity maintainer (serve existing inventory only)
    #[arg(long)]
    no_maintain: bool,

    /// Import `address,balance` lines from a CSV file, then exit
    #[arg(long)]
    import_whitelist: Option<PathBuf>,

    /// Delete all idle chunks and their tags, then exit
    #[arg(long)]
    clear_chunks: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("audit_node=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting audit-node"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(NodeDb::open(&config.db_path())?);
    let tags = Arc::new(TagStore::new(config.tags_dir()).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if let Some(path) = &args.import_whitelist {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        let imported = db.with_conn(|conn| whitelist::import_csv(conn, reader))?;
        info!(imported, path = %path.display(), "Whitelist import finished");
        return Ok(());
    }

    if args.clear_chunks {
        let gc = GarbageCollector::new(db.clone(), tags.clone(), clock.clone(), &config.gc);
        gc.clear_inventory().await?;
        return Ok(());
    }

    let verifier: Arc<dyn Verifier> = Arc::new(
        DigestVerifier::load_or_create(&config.verifier_key_path(), config.challenges_per_chunk)
            .context("failed to load verifier key")?,
    );
    info!(kind = verifier.kind(), "Verifier ready");

    let geolocator: Arc<dyn Geolocator> = match &config.geo_table_path {
        Some(path) => Arc::new(TableGeolocator::load(path)?),
        None => Arc::new(NullGeolocator),
    };

    let config = Arc::new(config);
    let services = Arc::new(Services::new(
        db.clone(),
        verifier.clone(),
        geolocator,
        tags.clone(),
        clock.clone(),
        config.clone(),
    ));

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port).parse()?;
    let http_server = Arc::new(HttpServer::new(services, http_addr, config.api_prefix.clone()));
    info!("Farmer API available at http://{}{}", http_addr, config.api_prefix);

    // Background loops share one shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background = Vec::new();

    if !args.no_maintain && config.capacity.enabled {
        let mut maintainer =
            CapacityMaintainer::new(db.clone(), verifier.clone(), tags.clone(), clock.clone(), &config);
        maintainer.set_shutdown(shutdown_tx.subscribe());
        background.push(tokio::spawn(async move { maintainer.run().await }));
    } else {
        info!("Capacity maintainer disabled");
    }

    let mut gc = GarbageCollector::new(db.clone(), tags.clone(), clock.clone(), &config.gc);
    gc.set_shutdown(shutdown_tx.subscribe());
    background.push(tokio::spawn(async move { gc.run().await }));

    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    // Signal background loops to stop
    let _ = shutdown_tx.send(());
    for handle in background {
        let _ = handle.await;
    }

    if let Ok(stats) = db.stats() {
        info!(
            tokens = stats.tokens,
            contracts = stats.contracts,
            chunks = stats.chunks,
            "Final node stats"
        );
    }

    Ok(())
}
