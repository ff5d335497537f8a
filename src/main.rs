//! Kindle (KDL) Blockchain Node
//!
//! Main entry point for running a Kindle node.
//! KDL is the short form used in addresses and logs.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kindle_core::config::{NodeConfig, StorageBackend};
use kindle_core::node::{GenesisInfo, Node};
use kindle_core::params::ParameterSet;
use kindle_core::storage::{BlockStore, MemoryBlockStore, SledBlockStore};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var("KINDLE_CONFIG") {
        Ok(path) => NodeConfig::load(path)?,
        Err(_) => NodeConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║                KINDLE (KDL) BLOCKCHAIN NODE              ║");
    println!("║      Proof of Work · Bitcoin Burn · Creator Coins        ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let params = ParameterSet::for_network(config.network);
    let genesis = GenesisInfo::new(&params);
    println!("Genesis Block Information:");
    println!("  Network:     {}", genesis.network);
    println!("  Hash:        {}", genesis.hash);
    println!("  Merkle Root: {}", genesis.merkle_root);
    println!("  Timestamp:   {}", genesis.timestamp);
    println!("  Seeded:      {} accounts", genesis.seed_accounts);
    println!();
    debug!(genesis = %serde_json::to_string(&genesis)?, "genesis info");

    let store: Arc<dyn BlockStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryBlockStore::new()),
        StorageBackend::Sled => Arc::new(SledBlockStore::open(&config.storage.data_dir)?),
    };
    let node = Arc::new(Node::new(params, store, config.node_options())?);
    node.restore_from_store(unix_now())?;

    let tip = node.best_header();
    info!(
        height = tip.height,
        tick_secs = config.tick_interval_secs,
        backend = ?config.storage.backend,
        "node running"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.tick_interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match node.tick(unix_now()) {
                    Ok(activation) => debug!(
                        height = activation.height,
                        connected = activation.connected,
                        orphans = node.orphan_count(),
                        "tick"
                    ),
                    Err(e) => {
                        error!(error = %e, "tick failed");
                        if node.is_halted() {
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
