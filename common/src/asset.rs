// Asset registry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::chain::ChainId;

pub const DEFAULT_DISCOVERED_DECIMALS: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Crypto,
    Fiat,
    Custom,
}

/// A registered asset.
///
/// `external_id` is the identifier the price provider knows this asset by and
/// is unique; `(symbol, chain_id)` is unique as well, with a null chain
/// meaning the native L1 coin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetData {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    pub external_id: String,
    pub decimals: u8,
    pub asset_type: AssetType,
    pub chain_id: Option<ChainId>,
    pub contract_address: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AssetData {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        external_id: impl Into<String>,
        decimals: u8,
        chain_id: Option<ChainId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            name: name.into(),
            external_id: external_id.into(),
            decimals,
            asset_type: AssetType::Crypto,
            chain_id,
            contract_address: None,
            market_cap_rank: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// A price provider search result, before the asset is registered locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSearchResult {
    pub external_id: String,
    pub symbol: String,
    pub name: String,
    pub rank: Option<u32>,
}
