// Tracked wallets and their sync lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::chain::{BlockNumber, ChainId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Error,
}

/// A user wallet whose on-chain activity is ingested into the ledger.
///
/// `(user_id, chain_id, lower(address))` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub chain_id: ChainId,
    // EIP-55 checksum form as provided by the user
    pub address: String,
    pub sync_status: SyncStatus,
    pub last_sync_block: Option<BlockNumber>,
    pub last_sync_at: Option<DateTime<Utc>>,
    // Set while a worker owns the wallet; stale claims are recoverable
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    // Consecutive failed cycles, drives the retry backoff; reset on success
    pub sync_failures: u32,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid, name: impl Into<String>, chain_id: ChainId, address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            chain_id,
            address: address.into(),
            sync_status: SyncStatus::Pending,
            last_sync_block: None,
            last_sync_at: None,
            sync_started_at: None,
            sync_error: None,
            sync_failures: 0,
            created_at: Utc::now(),
        }
    }

    // Address matching on-chain is case-insensitive
    pub fn address_key(&self) -> String {
        self.address.to_lowercase()
    }
}
