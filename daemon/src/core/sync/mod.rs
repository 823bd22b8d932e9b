//! Blockchain sync engine.
//!
//! One process-wide loop that periodically claims due wallets and ingests
//! their on-chain transfers through the ledger. Wallets sync concurrently
//! up to a bound; transfers inside one wallet commit sequentially so balance
//! rows are never contended from within a single cycle.

mod classify;

pub use self::classify::{classify_transfer, Classified};

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use folio_common::{
    chain::{BlockNumber, ChainId, TransferEvent, TransferPage},
    time,
    transaction::{TransactionRecord, TransactionStatus},
    wallet::Wallet,
};
use futures::StreamExt;
use metrics::counter;
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex},
    task::{JoinError, JoinHandle},
};
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    core::{
        assets::AssetRegistry,
        error::{ChainError, ErrorKind, LedgerError},
        ledger::{Ledger, RecordTransactionRequest, SYNC_SOURCE},
        storage::Storage,
    },
};

/// The blockchain transfer port.
#[async_trait]
pub trait ChainProvider: Send + Sync + 'static {
    /// Current chain head, needed to compute fetch ranges.
    async fn get_block_number(&self, chain_id: ChainId) -> Result<BlockNumber, ChainError>;

    /// One page of asset transfers touching `address` within the block
    /// range; `cursor` continues a previous page.
    async fn list_asset_transfers(
        &self,
        chain_id: ChainId,
        address: &str,
        from_block: BlockNumber,
        to_block: BlockNumber,
        cursor: Option<&str>,
    ) -> Result<TransferPage, ChainError>;
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync engine is already running")]
    AlreadyRunning,
    #[error("sync engine is not running")]
    NotRunning,
    #[error(transparent)]
    TaskError(#[from] JoinError),
}

pub type SharedSyncEngine<S> = Arc<SyncEngine<S>>;

pub struct SyncEngine<S: Storage> {
    storage: Arc<S>,
    ledger: Arc<Ledger<S>>,
    assets: Arc<AssetRegistry<S>>,
    chain: Arc<dyn ChainProvider>,
    config: SyncConfig,
    // tokio task running the poll loop
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Storage> SyncEngine<S> {
    pub fn new(
        storage: Arc<S>,
        ledger: Arc<Ledger<S>>,
        assets: Arc<AssetRegistry<S>>,
        chain: Arc<dyn ChainProvider>,
        config: SyncConfig,
    ) -> SharedSyncEngine<S> {
        Arc::new(Self {
            storage,
            ledger,
            assets,
            chain,
            config,
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start the poll loop. Errors if already running or disabled.
    pub async fn start(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        trace!("Starting sync engine");
        if !self.config.enabled {
            info!("Sync engine disabled by configuration");
            return Ok(());
        }
        if self.is_running().await {
            return Err(SyncError::AlreadyRunning);
        }

        let zelf = Arc::clone(self);
        *self.task.lock().await = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(zelf.config.poll_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                "Sync engine started (interval: {}s, concurrency: {})",
                zelf.config.poll_interval_secs, zelf.config.concurrent_wallets
            );

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!("Sync engine observing shutdown");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(err) = zelf.run_cycle().await {
                    // The loop itself never dies on a cycle error
                    error!("Sync cycle failed: {}", err);
                }
            }

            info!("Sync engine stopped");
        }));

        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SyncError> {
        trace!("Stopping sync engine");
        if let Some(handle) = self.task.lock().await.take() {
            if handle.is_finished() {
                handle.await?;
            } else {
                handle.abort();
            }
            Ok(())
        } else {
            Err(SyncError::NotRunning)
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// One pass over every wallet currently due.
    pub async fn run_cycle(&self) -> Result<(), LedgerError> {
        let now = time::now();
        let due = self
            .storage
            .list_wallets_due_for_sync(
                now,
                self.config.poll_interval(),
                self.config.stale_claim_threshold(),
            )
            .await?;
        if due.is_empty() {
            trace!("No wallets due for sync");
            return Ok(());
        }
        debug!("Syncing {} due wallet(s)", due.len());

        futures::stream::iter(due)
            .for_each_concurrent(self.config.concurrent_wallets.max(1), |wallet| async move {
                let wallet_id = wallet.id;
                if let Err(err) = self.sync_wallet(wallet).await {
                    error!("Wallet {} sync failed: {}", wallet_id, err);
                }
            })
            .await;

        Ok(())
    }

    /// Claim, fetch, classify and commit one wallet's pending range.
    pub async fn sync_wallet(&self, wallet: Wallet) -> Result<(), LedgerError> {
        let now = time::now();
        let claimed = self
            .storage
            .claim_wallet_for_sync(wallet.id, now, self.config.stale_claim_threshold())
            .await?;
        if !claimed {
            debug!("Wallet {} already claimed by another worker", wallet.id);
            return Ok(());
        }

        match self.sync_claimed_wallet(&wallet).await {
            Ok(last_block) => {
                self.storage
                    .complete_wallet_sync(wallet.id, last_block, time::now())
                    .await?;
                counter!("folio_sync_wallet_cycles", "outcome" => "ok").increment(1);
                Ok(())
            }
            Err(err) => {
                counter!("folio_sync_wallet_cycles", "outcome" => "error").increment(1);
                self.storage
                    .fail_wallet_sync(wallet.id, &err.to_string(), time::now())
                    .await?;
                Err(err)
            }
        }
    }

    async fn sync_claimed_wallet(
        &self,
        wallet: &Wallet,
    ) -> Result<Option<BlockNumber>, LedgerError> {
        let head = self.chain.get_block_number(wallet.chain_id).await?;
        let from = match wallet.last_sync_block {
            Some(block) => block + 1,
            None => head.saturating_sub(self.config.initial_lookback_blocks),
        };
        if from > head {
            trace!("Wallet {} has nothing new (head {})", wallet.id, head);
            return Ok(None);
        }
        let to = head.min(from + self.config.max_blocks_per_cycle.saturating_sub(1));
        debug!(
            "Syncing wallet {} blocks {}..={} (head {})",
            wallet.id, from, to, head
        );

        let user_wallets: HashMap<String, Wallet> = self
            .storage
            .list_user_wallets_on_chain(wallet.user_id, wallet.chain_id)
            .await?
            .into_iter()
            .map(|w| (w.address_key(), w))
            .collect();

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .chain
                .list_asset_transfers(
                    wallet.chain_id,
                    &wallet.address,
                    from,
                    to,
                    cursor.as_deref(),
                )
                .await?;

            // Sequential commits keep one wallet's balance rows uncontended
            for transfer in page.transfers {
                self.ingest_transfer(wallet, &user_wallets, transfer).await?;
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(Some(to))
    }

    /// Ingest one transfer. Classification and validation failures are
    /// recorded and skipped; transient failures abort the cycle so the
    /// range is retried.
    async fn ingest_transfer(
        &self,
        wallet: &Wallet,
        user_wallets: &HashMap<String, Wallet>,
        transfer: TransferEvent,
    ) -> Result<(), LedgerError> {
        let external_id = transfer.external_id(wallet.chain_id);
        match classify_transfer(wallet, &transfer, user_wallets) {
            Classified::Skip(reason) => {
                trace!("Skipping transfer {}: {}", external_id, reason);
                Ok(())
            }
            Classified::Unknown(reason) => {
                warn!("Unclassifiable transfer {}: {}", external_id, reason);
                self.record_unknown_envelope(&transfer, external_id, reason)
                    .await;
                Ok(())
            }
            Classified::Record {
                transaction_type,
                payload,
            } => {
                // The handler needs the asset registered to resolve it
                if let Err(err) = self
                    .assets
                    .register_transfer_asset(wallet.chain_id, &transfer.asset)
                    .await
                {
                    warn!(
                        "Could not register asset {} from transfer: {}",
                        transfer.asset.symbol(),
                        err
                    );
                }

                let request = RecordTransactionRequest {
                    transaction_type: transaction_type.to_owned(),
                    source: SYNC_SOURCE.to_owned(),
                    external_id: Some(external_id.clone()),
                    occurred_at: transfer.timestamp,
                    payload,
                    user_id: None,
                };
                match self.ledger.record_transaction(request).await {
                    Ok(_) => {
                        counter!("folio_sync_transfers_ingested").increment(1);
                        Ok(())
                    }
                    Err(err)
                        if matches!(
                            err.kind(),
                            ErrorKind::ProviderTransient | ErrorKind::PersistenceTransient
                        ) =>
                    {
                        // Retryable next cycle from the same block
                        Err(err)
                    }
                    Err(err) => {
                        // The ledger already recorded a failure envelope
                        warn!("Transfer {} rejected: {}", external_id, err);
                        counter!("folio_sync_transfers_rejected").increment(1);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn record_unknown_envelope(
        &self,
        transfer: &TransferEvent,
        external_id: String,
        reason: String,
    ) {
        let envelope = TransactionRecord {
            id: Uuid::new_v4(),
            transaction_type: "unknown".to_owned(),
            source: SYNC_SOURCE.to_owned(),
            external_id: Some(external_id),
            status: TransactionStatus::Failed,
            occurred_at: transfer.timestamp,
            recorded_at: time::now(),
            raw_data: serde_json::to_value(transfer).unwrap_or(serde_json::Value::Null),
            metadata: serde_json::Value::Null,
            error_message: Some(reason),
        };
        if let Err(err) = self.storage.insert_failed_transaction(&envelope).await {
            warn!("Could not record unknown-transfer envelope: {}", err);
        }
    }
}
