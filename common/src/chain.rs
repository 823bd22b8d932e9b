// On-chain transfer records as delivered by the blockchain transfer port.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

// EVM chain identifier (1 = mainnet, 137 = polygon, ...)
pub type ChainId = i64;

pub type BlockNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCategory {
    Native,
    Erc20,
    Internal,
}

/// The asset moved by a transfer: either the chain's native coin or a token
/// contract with its own symbol and decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransferAsset {
    Native { symbol: String, decimals: u8 },
    Erc20 {
        contract_address: String,
        symbol: String,
        decimals: u8,
    },
}

impl TransferAsset {
    pub fn symbol(&self) -> &str {
        match self {
            TransferAsset::Native { symbol, .. } => symbol,
            TransferAsset::Erc20 { symbol, .. } => symbol,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            TransferAsset::Native { decimals, .. } => *decimals,
            TransferAsset::Erc20 { decimals, .. } => *decimals,
        }
    }
}

/// One asset transfer observed on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: BlockNumber,
    pub timestamp: DateTime<Utc>,
    // Sender and recipient addresses as returned by the provider; matching
    // against wallets is done case-insensitively
    pub from: String,
    pub to: String,
    // Integer amount in the asset's native decimals
    pub value: Amount,
    pub asset: TransferAsset,
    pub category: TransferCategory,
    // Gas fee paid by the sender of the enclosing transaction, in native
    // units, when the provider exposes it
    pub gas_fee: Option<Amount>,
}

impl TransferEvent {
    /// Stable identity of this transfer across repeated fetches, used as the
    /// ledger idempotency key.
    pub fn external_id(&self, chain_id: ChainId) -> String {
        format!("{}:{}:{}", chain_id, self.tx_hash, self.log_index)
    }
}

/// A page of transfers plus the cursor to fetch the next one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferPage {
    pub transfers: Vec<TransferEvent>,
    pub next_cursor: Option<String>,
}
