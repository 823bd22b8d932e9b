use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::sync::watch;

use folio_daemon::{
    config::{OracleConfig, SyncConfig, SHUTDOWN_GRACE_SECS},
    core::{
        assets::AssetRegistry,
        handlers::default_registry,
        ledger::Ledger,
        oracle::{spawn_price_refresher, MemoryPriceCache, PriceCache, PriceOracle, PriceProvider},
        simulator::{SimulatedChainProvider, SimulatedPriceProvider},
        storage::MemoryStorage,
        sync::{ChainProvider, SyncEngine},
    },
};

#[derive(Debug, Parser)]
#[clap(version, about = "Folio portfolio ledger daemon")]
struct DaemonOptions {
    #[clap(flatten)]
    sync: SyncConfig,
    #[clap(flatten)]
    oracle: OracleConfig,
    /// Log filter (error, warn, info, debug, trace)
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = DaemonOptions::parse();
    env_logger::Builder::new()
        .parse_filters(&options.log_level)
        .init();

    info!("Starting folio daemon");

    let storage = Arc::new(MemoryStorage::new());
    let cache: Arc<dyn PriceCache> = Arc::new(MemoryPriceCache::default());
    let price_provider: Arc<SimulatedPriceProvider> = Arc::new(SimulatedPriceProvider::new());
    let chain_provider: Arc<dyn ChainProvider> = Arc::new(SimulatedChainProvider::new());
    warn!("Running with simulated providers (dev mode): external prices and transfers are not live");

    let assets = Arc::new(AssetRegistry::new(
        Arc::clone(&storage),
        Arc::clone(&price_provider) as Arc<dyn PriceProvider>,
    ));
    let oracle = Arc::new(PriceOracle::new(
        Arc::clone(&storage),
        cache,
        Arc::clone(&price_provider) as Arc<dyn PriceProvider>,
        options.oracle.clone(),
    ));
    let registry = Arc::new(default_registry());
    let ledger = Arc::new(Ledger::new(
        Arc::clone(&storage),
        Arc::clone(&registry),
        Arc::clone(&oracle),
        Arc::clone(&assets),
    ));
    let engine = SyncEngine::new(
        Arc::clone(&storage),
        ledger,
        assets,
        chain_provider,
        options.sync.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    engine.start(shutdown_rx.clone()).await?;
    let refresher = spawn_price_refresher(Arc::clone(&oracle), shutdown_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
    if engine.is_running().await {
        engine.stop().await?;
    }
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), refresher)
        .await
        .is_err()
    {
        warn!("Price refresher did not stop within the grace period");
    }

    info!("Folio daemon stopped");
    Ok(())
}
