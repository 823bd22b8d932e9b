// Shared fixtures: a fully wired core over in-memory backends, plus mock
// providers with failure injection for oracle and sync tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use folio_common::{
    account::AccountCode,
    amount::{Amount, SignedAmount},
    asset::{AssetData, AssetSearchResult},
    chain::{BlockNumber, ChainId, TransferPage},
    time,
    wallet::Wallet,
};
use uuid::Uuid;

use crate::{
    config::{OracleConfig, SyncConfig},
    core::{
        assets::AssetRegistry,
        error::{ChainError, ProviderError},
        handlers::{default_registry, HandlerRegistry},
        ledger::{Ledger, RecordTransactionRequest},
        oracle::{MemoryPriceCache, PriceOracle, PriceProvider},
        simulator::{SimulatedChainProvider, SimulatedPriceProvider},
        storage::{AssetProvider, MemoryStorage, WalletProvider},
        sync::{SharedSyncEngine, SyncEngine},
    },
};

pub const BTC_PRICE: &str = "5000000000000"; // $50,000 * 10^8
pub const ETH_PRICE: &str = "300000000000"; // $3,000 * 10^8
pub const USDC_PRICE: &str = "100000000"; // $1 * 10^8

pub fn amt(value: &str) -> Amount {
    Amount::from_dec_str(value).unwrap()
}

pub struct TestEnv {
    pub storage: Arc<MemoryStorage>,
    pub chain: Arc<SimulatedChainProvider>,
    pub assets: Arc<AssetRegistry<MemoryStorage>>,
    pub oracle: Arc<PriceOracle<MemoryStorage>>,
    pub registry: Arc<HandlerRegistry<MemoryStorage>>,
    pub ledger: Arc<Ledger<MemoryStorage>>,
    pub engine: SharedSyncEngine<MemoryStorage>,
    pub btc: AssetData,
}

pub async fn test_env() -> TestEnv {
    test_env_with_sync(SyncConfig {
        poll_interval_secs: 1,
        ..SyncConfig::default()
    })
    .await
}

pub async fn test_env_with_sync(sync_config: SyncConfig) -> TestEnv {
    // Short lock timeout keeps crossed-lock tests fast
    let storage = Arc::new(MemoryStorage::with_lock_timeout(
        std::time::Duration::from_millis(500),
    ));
    let cache = Arc::new(MemoryPriceCache::default());
    let provider = Arc::new(SimulatedPriceProvider::new());
    let chain = Arc::new(SimulatedChainProvider::new());

    provider.set_price("bitcoin", amt(BTC_PRICE));
    provider.set_price("ethereum", amt(ETH_PRICE));
    provider.set_price("usd-coin", amt(USDC_PRICE));

    let (btc, _eth, _usdc) = seed_assets(&storage).await;

    let assets = Arc::new(AssetRegistry::new(
        Arc::clone(&storage),
        Arc::clone(&provider) as Arc<dyn PriceProvider>,
    ));
    let oracle = Arc::new(PriceOracle::new(
        Arc::clone(&storage),
        Arc::clone(&cache) as _,
        Arc::clone(&provider) as _,
        OracleConfig::default(),
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
        Arc::clone(&ledger),
        Arc::clone(&assets),
        Arc::clone(&chain) as _,
        sync_config,
    );

    TestEnv {
        storage,
        chain,
        assets,
        oracle,
        registry,
        ledger,
        engine,
        btc,
    }
}

pub async fn seed_assets(storage: &MemoryStorage) -> (AssetData, AssetData, AssetData) {
    let btc = storage
        .insert_asset_if_absent(&AssetData::new("BTC", "Bitcoin", "bitcoin", 8, None))
        .await
        .unwrap();
    let eth = storage
        .insert_asset_if_absent(&AssetData::new("ETH", "Ethereum", "ethereum", 18, None))
        .await
        .unwrap();
    let usdc = storage
        .insert_asset_if_absent(&AssetData::new("USDC", "USD Coin", "usd-coin", 6, Some(1)))
        .await
        .unwrap();
    (btc, eth, usdc)
}

impl TestEnv {
    pub async fn create_wallet(&self, chain_id: ChainId, address: &str) -> Wallet {
        let wallet = Wallet::new(Uuid::new_v4(), "test wallet", chain_id, address);
        self.storage.insert_wallet(&wallet).await.unwrap();
        wallet
    }

    pub async fn create_wallet_for_user(
        &self,
        user_id: Uuid,
        chain_id: ChainId,
        address: &str,
    ) -> Wallet {
        let wallet = Wallet::new(user_id, "test wallet", chain_id, address);
        self.storage.insert_wallet(&wallet).await.unwrap();
        wallet
    }

    /// Record a manual deposit with an explicit rate override.
    pub async fn deposit(&self, wallet_id: Uuid, asset: &str, amount: &str, rate: &str) {
        self.ledger
            .record_transaction(manual_request(
                "transfer_in",
                serde_json::json!({
                    "wallet_id": wallet_id,
                    "asset_id": asset,
                    "amount": amount,
                    "usd_rate": rate,
                }),
            ))
            .await
            .unwrap();
    }

    pub async fn wallet_balance(&self, wallet_id: Uuid, asset: &str) -> SignedAmount {
        let code = AccountCode::wallet(wallet_id, asset);
        let Ok(account) = self.ledger.get_account_by_code(&code).await else {
            return SignedAmount::zero();
        };
        self.ledger
            .get_account_balance(account.id, asset)
            .await
            .unwrap()
            .balance
    }
}

pub fn manual_request(
    transaction_type: &str,
    payload: serde_json::Value,
) -> RecordTransactionRequest {
    RecordTransactionRequest {
        transaction_type: transaction_type.to_owned(),
        source: "manual".to_owned(),
        external_id: None,
        occurred_at: time::now() - chrono::Duration::seconds(1),
        payload,
        user_id: None,
    }
}

/// Price provider with call counting and failure injection.
#[derive(Default)]
pub struct MockPriceProvider {
    prices: Mutex<HashMap<String, Amount>>,
    historical: Mutex<HashMap<(String, NaiveDate), Amount>>,
    pub failing: AtomicBool,
    pub current_calls: AtomicU32,
    pub historical_calls: AtomicU32,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, external_id: &str, price: Amount) {
        self.prices
            .lock()
            .unwrap()
            .insert(external_id.to_owned(), price);
    }

    pub fn set_historical_price(&self, external_id: &str, date: NaiveDate, price: Amount) {
        self.historical
            .lock()
            .unwrap()
            .insert((external_id.to_owned(), date), price);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    async fn get_current_prices(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, Amount>, ProviderError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("provider down".to_owned()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(external_ids
            .iter()
            .filter_map(|id| prices.get(id).map(|price| (id.clone(), *price)))
            .collect())
    }

    async fn get_historical_price(
        &self,
        external_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Amount>, ProviderError> {
        self.historical_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("provider down".to_owned()));
        }
        Ok(self
            .historical
            .lock()
            .unwrap()
            .get(&(external_id.to_owned(), date))
            .copied())
    }

    async fn search(&self, _query: &str) -> Result<Vec<AssetSearchResult>, ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("provider down".to_owned()));
        }
        Ok(Vec::new())
    }
}

/// Chain provider whose every call fails, for error-path tests.
pub struct FailingChainProvider;

#[async_trait]
impl crate::core::sync::ChainProvider for FailingChainProvider {
    async fn get_block_number(&self, _chain_id: ChainId) -> Result<BlockNumber, ChainError> {
        Err(ChainError::Request("chain provider down".to_owned()))
    }

    async fn list_asset_transfers(
        &self,
        _chain_id: ChainId,
        _address: &str,
        _from_block: BlockNumber,
        _to_block: BlockNumber,
        _cursor: Option<&str>,
    ) -> Result<TransferPage, ChainError> {
        Err(ChainError::Request("chain provider down".to_owned()))
    }
}
