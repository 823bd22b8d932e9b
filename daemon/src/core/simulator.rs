//! Simulated external providers.
//!
//! Deterministic in-process stand-ins for the price and blockchain ports,
//! used by the daemon's dev mode and by integration tests. Prices and
//! transfers are seeded programmatically; fetch behavior mirrors the real
//! ports (pagination, absent prices, configurable head).

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use folio_common::{
    amount::Amount,
    asset::AssetSearchResult,
    chain::{BlockNumber, ChainId, TransferEvent, TransferPage},
};

use crate::core::{
    error::{ChainError, ProviderError},
    oracle::PriceProvider,
    sync::ChainProvider,
};

const TRANSFER_PAGE_SIZE: usize = 100;

#[derive(Default)]
struct PriceState {
    current: HashMap<String, Amount>,
    historical: HashMap<(String, NaiveDate), Amount>,
    searchable: Vec<AssetSearchResult>,
}

/// Price provider serving seeded values.
#[derive(Default)]
pub struct SimulatedPriceProvider {
    state: Mutex<PriceState>,
}

impl SimulatedPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, external_id: &str, price: Amount) {
        let mut state = self.state.lock().expect("price state poisoned");
        state.current.insert(external_id.to_owned(), price);
    }

    pub fn set_historical_price(&self, external_id: &str, date: NaiveDate, price: Amount) {
        let mut state = self.state.lock().expect("price state poisoned");
        state
            .historical
            .insert((external_id.to_owned(), date), price);
    }

    pub fn add_search_result(&self, result: AssetSearchResult) {
        let mut state = self.state.lock().expect("price state poisoned");
        state.searchable.push(result);
    }
}

#[async_trait]
impl PriceProvider for SimulatedPriceProvider {
    async fn get_current_prices(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, Amount>, ProviderError> {
        let state = self.state.lock().expect("price state poisoned");
        Ok(external_ids
            .iter()
            .filter_map(|id| state.current.get(id).map(|price| (id.clone(), *price)))
            .collect())
    }

    async fn get_historical_price(
        &self,
        external_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Amount>, ProviderError> {
        let state = self.state.lock().expect("price state poisoned");
        Ok(state
            .historical
            .get(&(external_id.to_owned(), date))
            .copied())
    }

    async fn search(&self, query: &str) -> Result<Vec<AssetSearchResult>, ProviderError> {
        let needle = query.to_lowercase();
        let state = self.state.lock().expect("price state poisoned");
        Ok(state
            .searchable
            .iter()
            .filter(|result| {
                result.symbol.to_lowercase().contains(&needle)
                    || result.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ChainState {
    heads: HashMap<ChainId, BlockNumber>,
    transfers: HashMap<ChainId, Vec<TransferEvent>>,
}

/// Chain provider replaying seeded transfers.
#[derive(Default)]
pub struct SimulatedChainProvider {
    state: Mutex<ChainState>,
}

impl SimulatedChainProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, chain_id: ChainId, head: BlockNumber) {
        let mut state = self.state.lock().expect("chain state poisoned");
        state.heads.insert(chain_id, head);
    }

    /// Seed a transfer and bump the head to cover its block.
    pub fn add_transfer(&self, chain_id: ChainId, transfer: TransferEvent) {
        let mut state = self.state.lock().expect("chain state poisoned");
        let head = state.heads.entry(chain_id).or_insert(0);
        *head = (*head).max(transfer.block_number);
        state.transfers.entry(chain_id).or_default().push(transfer);
    }
}

#[async_trait]
impl ChainProvider for SimulatedChainProvider {
    async fn get_block_number(&self, chain_id: ChainId) -> Result<BlockNumber, ChainError> {
        let state = self.state.lock().expect("chain state poisoned");
        Ok(state.heads.get(&chain_id).copied().unwrap_or(0))
    }

    async fn list_asset_transfers(
        &self,
        chain_id: ChainId,
        address: &str,
        from_block: BlockNumber,
        to_block: BlockNumber,
        cursor: Option<&str>,
    ) -> Result<TransferPage, ChainError> {
        let address = address.to_lowercase();
        let state = self.state.lock().expect("chain state poisoned");
        let matching: Vec<TransferEvent> = state
            .transfers
            .get(&chain_id)
            .map(|transfers| {
                transfers
                    .iter()
                    .filter(|transfer| {
                        transfer.block_number >= from_block
                            && transfer.block_number <= to_block
                            && (transfer.from.to_lowercase() == address
                                || transfer.to.to_lowercase() == address)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let offset: usize = cursor
            .map(|cursor| {
                cursor
                    .parse()
                    .map_err(|_| ChainError::Request(format!("bad cursor '{}'", cursor)))
            })
            .transpose()?
            .unwrap_or(0);

        let page: Vec<TransferEvent> = matching
            .iter()
            .skip(offset)
            .take(TRANSFER_PAGE_SIZE)
            .cloned()
            .collect();
        let next_cursor = if offset + page.len() < matching.len() {
            Some((offset + page.len()).to_string())
        } else {
            None
        };

        Ok(TransferPage {
            transfers: page,
            next_cursor,
        })
    }
}
