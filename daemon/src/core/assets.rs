//! Asset registry.
//!
//! Resolves symbols to registered assets, disambiguating by chain, and
//! discovers unknown assets through the price provider's search endpoint.

use std::sync::Arc;

use folio_common::{
    asset::{AssetData, DEFAULT_DISCOVERED_DECIMALS},
    chain::{ChainId, TransferAsset},
};
use uuid::Uuid;

use crate::{
    config::native_symbol,
    core::{error::LedgerError, oracle::PriceProvider, storage::Storage},
};

pub struct AssetRegistry<S: Storage> {
    storage: Arc<S>,
    provider: Arc<dyn PriceProvider>,
}

impl<S: Storage> AssetRegistry<S> {
    pub fn new(storage: Arc<S>, provider: Arc<dyn PriceProvider>) -> Self {
        Self { storage, provider }
    }

    pub async fn get(&self, id: Uuid) -> Result<AssetData, LedgerError> {
        self.storage
            .get_asset(id)
            .await?
            .ok_or_else(|| LedgerError::UnknownAsset(id.to_string()))
    }

    /// Resolve `(symbol, chain_id?)` to exactly one asset.
    ///
    /// Without a chain hint a symbol living on several chains is ambiguous
    /// and the caller gets the candidate chains back.
    pub async fn resolve(
        &self,
        symbol: &str,
        chain_id: Option<ChainId>,
    ) -> Result<AssetData, LedgerError> {
        let candidates: Vec<AssetData> = self
            .storage
            .list_assets_by_symbol(symbol)
            .await?
            .into_iter()
            .filter(|asset| asset.is_active)
            .collect();

        match chain_id {
            Some(chain) => candidates
                .into_iter()
                .find(|asset| asset.chain_id == Some(chain))
                .ok_or_else(|| LedgerError::UnknownAsset(symbol.to_owned())),
            None => match candidates.len() {
                0 => Err(LedgerError::UnknownAsset(symbol.to_owned())),
                1 => Ok(candidates.into_iter().next().expect("one candidate")),
                _ => Err(LedgerError::AmbiguousSymbol {
                    symbol: symbol.to_owned(),
                    chains: candidates.iter().map(|asset| asset.chain_id).collect(),
                }),
            },
        }
    }

    /// Resolution used by wallet-scoped operations: an exact chain match
    /// wins, a globally unique symbol is accepted, anything else is
    /// ambiguous.
    pub async fn resolve_for_wallet(
        &self,
        symbol: &str,
        chain_id: ChainId,
    ) -> Result<AssetData, LedgerError> {
        let candidates: Vec<AssetData> = self
            .storage
            .list_assets_by_symbol(symbol)
            .await?
            .into_iter()
            .filter(|asset| asset.is_active)
            .collect();

        if let Some(exact) = candidates
            .iter()
            .find(|asset| asset.chain_id == Some(chain_id))
        {
            return Ok(exact.clone());
        }
        match candidates.len() {
            0 => Err(LedgerError::UnknownAsset(symbol.to_owned())),
            1 => Ok(candidates.into_iter().next().expect("one candidate")),
            _ => Err(LedgerError::AmbiguousSymbol {
                symbol: symbol.to_owned(),
                chains: candidates.iter().map(|asset| asset.chain_id).collect(),
            }),
        }
    }

    /// The native coin of a chain (gas is always paid in it).
    pub async fn native_asset(&self, chain_id: ChainId) -> Result<AssetData, LedgerError> {
        let symbol =
            native_symbol(chain_id).ok_or(LedgerError::UnknownNativeAsset(chain_id))?;
        let candidates = self.storage.list_assets_by_symbol(symbol).await?;
        candidates
            .iter()
            // Null chain marks the native L1 row
            .find(|asset| asset.chain_id.is_none() && asset.is_active)
            .or_else(|| candidates.first())
            .cloned()
            .ok_or(LedgerError::UnknownNativeAsset(chain_id))
    }

    /// Provider-backed discovery. Every hit is persisted with the provider's
    /// id and default decimals; duplicate-key races resolve to the surviving
    /// row.
    pub async fn discover(&self, query: &str) -> Result<Vec<AssetData>, LedgerError> {
        let results = self.provider.search(query).await?;
        let mut discovered = Vec::with_capacity(results.len());
        for result in results {
            let mut asset = AssetData::new(
                result.symbol.to_uppercase(),
                result.name,
                result.external_id,
                DEFAULT_DISCOVERED_DECIMALS,
                None,
            );
            asset.market_cap_rank = result.rank;
            let surviving = self.storage.insert_asset_if_absent(&asset).await?;
            discovered.push(surviving);
        }
        Ok(discovered)
    }

    /// Make sure an asset seen in an on-chain transfer exists locally so the
    /// ledger can post entries against it. The provider-side id is a
    /// best-effort guess (lowercased symbol) until discovery fills it in.
    pub async fn register_transfer_asset(
        &self,
        chain_id: ChainId,
        transfer_asset: &TransferAsset,
    ) -> Result<AssetData, LedgerError> {
        let symbol = transfer_asset.symbol().to_uppercase();
        let chain = match transfer_asset {
            TransferAsset::Native { .. } => None,
            TransferAsset::Erc20 { .. } => Some(chain_id),
        };

        let mut asset = AssetData::new(
            symbol.clone(),
            symbol.clone(),
            transfer_asset.symbol().to_lowercase(),
            transfer_asset.decimals(),
            chain,
        );
        if let TransferAsset::Erc20 {
            contract_address, ..
        } = transfer_asset
        {
            asset.contract_address = Some(contract_address.clone());
        }

        Ok(self.storage.insert_asset_if_absent(&asset).await?)
    }
}
