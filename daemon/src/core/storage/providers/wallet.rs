//! Wallet Provider
//!
//! Wallet rows and the sync claim protocol. The claim is a compare-and-set:
//! exactly one worker owns a wallet at a time, and claims abandoned by a
//! crashed worker become re-claimable after the stale threshold.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_common::{
    chain::{BlockNumber, ChainId},
    wallet::Wallet,
};
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait WalletProvider {
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>, StorageError>;

    /// Register a wallet. `(user_id, chain_id, lower(address))` is unique.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StorageError>;

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError>;

    /// Other wallets of the same user on the same chain, for transfer
    /// classification.
    async fn list_user_wallets_on_chain(
        &self,
        user_id: Uuid,
        chain_id: ChainId,
    ) -> Result<Vec<Wallet>, StorageError>;

    /// Wallets whose next sync is due at `now`: pending ones, synced ones
    /// past the poll interval, errored ones past their backoff, and syncing
    /// ones whose claim went stale.
    async fn list_wallets_due_for_sync(
        &self,
        now: DateTime<Utc>,
        poll_interval: Duration,
        stale_claim: Duration,
    ) -> Result<Vec<Wallet>, StorageError>;

    /// Atomically claim a wallet for syncing. Returns false when another
    /// worker holds a live claim.
    async fn claim_wallet_for_sync(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_claim: Duration,
    ) -> Result<bool, StorageError>;

    /// Mark a cycle as finished; advances `last_sync_block` when provided.
    async fn complete_wallet_sync(
        &self,
        id: Uuid,
        last_sync_block: Option<BlockNumber>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Record a failed cycle; `last_sync_block` stays untouched so the next
    /// cycle retries the same range.
    async fn fail_wallet_sync(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}
