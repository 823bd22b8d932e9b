//! Layered price oracle.
//!
//! Lookup order for a current price: hot cache, recent history, provider
//! (behind the circuit breaker), stale cache. The first three return fresh
//! quotes; the stale cache returns a success carrying a staleness warning.
//! Provider responses write through to history and both cache namespaces.

mod breaker;
mod cache;

pub use self::{
    breaker::CircuitBreaker,
    cache::{
        hot_price_key, stale_price_key, MemoryPriceCache, PriceCache, HOT_PRICE_PREFIX,
        STALE_PRICE_PREFIX,
    },
};

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use folio_common::{
    amount::Amount,
    asset::{AssetData, AssetSearchResult},
    price::{PricePoint, PriceQuote, PriceSource},
    time,
};
use indexmap::IndexMap;
use metrics::counter;
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::{
    config::OracleConfig,
    core::{
        error::{LedgerError, ProviderError},
        storage::Storage,
    },
};

/// The external price provider port.
#[async_trait]
pub trait PriceProvider: Send + Sync + 'static {
    /// Current USD prices (scaled by 10^8) for the given provider-side ids.
    /// Ids the provider cannot price are simply absent from the result.
    async fn get_current_prices(
        &self,
        external_ids: &[String],
    ) -> Result<HashMap<String, Amount>, ProviderError>;

    /// USD price for one UTC calendar date.
    async fn get_historical_price(
        &self,
        external_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Amount>, ProviderError>;

    async fn search(&self, query: &str) -> Result<Vec<AssetSearchResult>, ProviderError>;
}

pub struct PriceOracle<S: Storage> {
    storage: Arc<S>,
    cache: Arc<dyn PriceCache>,
    provider: Arc<dyn PriceProvider>,
    breaker: CircuitBreaker,
    config: OracleConfig,
}

impl<S: Storage> PriceOracle<S> {
    pub fn new(
        storage: Arc<S>,
        cache: Arc<dyn PriceCache>,
        provider: Arc<dyn PriceProvider>,
        config: OracleConfig,
    ) -> Self {
        Self::with_breaker(storage, cache, provider, config, CircuitBreaker::default())
    }

    pub fn with_breaker(
        storage: Arc<S>,
        cache: Arc<dyn PriceCache>,
        provider: Arc<dyn PriceProvider>,
        config: OracleConfig,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            storage,
            cache,
            provider,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Resolve the current USD price of an asset through the cache layers.
    pub async fn current_price(&self, asset: &AssetData) -> Result<PriceQuote, LedgerError> {
        let now = time::now();

        // Layer 1: hot cache
        if let Some(price) = self.cached_price(&hot_price_key(&asset.external_id)).await {
            counter!("folio_oracle_layer_hit", "layer" => "hot").increment(1);
            return Ok(PriceQuote::fresh(price));
        }

        // Layer 2: recent history
        match self
            .storage
            .get_recent_price(asset.id, self.config.recent_window(), now)
            .await
        {
            Ok(Some(point)) => {
                counter!("folio_oracle_layer_hit", "layer" => "history").increment(1);
                self.cache_price(
                    &hot_price_key(&asset.external_id),
                    point.price_usd,
                    self.config.hot_ttl(),
                )
                .await;
                return Ok(PriceQuote::fresh(point.price_usd));
            }
            Ok(None) => {}
            Err(err) => warn!("Recent price lookup failed for {}: {}", asset.symbol, err),
        }

        // Layer 3: provider, behind the breaker
        if self.breaker.can_attempt() {
            match self
                .provider
                .get_current_prices(std::slice::from_ref(&asset.external_id))
                .await
            {
                Ok(prices) => {
                    self.breaker.record_success();
                    if let Some(price) = prices.get(&asset.external_id).copied() {
                        counter!("folio_oracle_layer_hit", "layer" => "provider")
                            .increment(1);
                        self.store_price(asset, price).await;
                        return Ok(PriceQuote::fresh(price));
                    }
                    debug!("Provider has no current price for {}", asset.external_id);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    warn!("Price provider failed for {}: {}", asset.external_id, err);
                }
            }
        } else {
            debug!(
                "Circuit breaker open, skipping provider for {}",
                asset.external_id
            );
        }

        // Layer 4: stale cache
        if let Some(price) = self
            .cached_price(&stale_price_key(&asset.external_id))
            .await
        {
            counter!("folio_oracle_layer_hit", "layer" => "stale").increment(1);
            return Ok(PriceQuote::stale(price, None));
        }

        counter!("folio_oracle_miss").increment(1);
        Err(LedgerError::PriceUnavailable(asset.symbol.clone()))
    }

    /// Historical USD price for the UTC date: history first, then provider.
    pub async fn price_at(
        &self,
        asset: &AssetData,
        date: NaiveDate,
    ) -> Result<Amount, LedgerError> {
        if let Some(point) = self.storage.get_price_at(asset.id, date).await? {
            return Ok(point.price_usd);
        }

        if self.breaker.can_attempt() {
            match self
                .provider
                .get_historical_price(&asset.external_id, date)
                .await
            {
                Ok(Some(price)) => {
                    self.breaker.record_success();
                    let point = PricePoint {
                        asset_id: asset.id,
                        time: time::date_start(date),
                        price_usd: price,
                        source: PriceSource::Provider,
                    };
                    if let Err(err) = self.storage.upsert_price_point(&point).await {
                        warn!("Failed to persist historical price: {}", err);
                    }
                    return Ok(price);
                }
                Ok(None) => self.breaker.record_success(),
                Err(err) => {
                    self.breaker.record_failure();
                    warn!(
                        "Historical price fetch failed for {} at {}: {}",
                        asset.external_id, date, err
                    );
                }
            }
        }

        Err(LedgerError::PriceUnavailable(asset.symbol.clone()))
    }

    /// Batched current-price lookup. Partial success: the result only holds
    /// assets that resolved somewhere in the layer stack.
    pub async fn current_prices(
        &self,
        assets: &[AssetData],
    ) -> Result<IndexMap<Uuid, PriceQuote>, LedgerError> {
        let now = time::now();
        let mut resolved: IndexMap<Uuid, PriceQuote> = IndexMap::new();
        let mut missing: Vec<&AssetData> = Vec::new();

        // One multi-get against the hot namespace
        let hot_keys: Vec<String> = assets
            .iter()
            .map(|asset| hot_price_key(&asset.external_id))
            .collect();
        let hot_hits = match self.cache.get_multi(&hot_keys).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!("Hot cache multi-get failed: {}", err);
                HashMap::new()
            }
        };
        for asset in assets {
            match hot_hits
                .get(&hot_price_key(&asset.external_id))
                .and_then(|value| Amount::from_dec_str(value).ok())
            {
                Some(price) => {
                    resolved.insert(asset.id, PriceQuote::fresh(price));
                }
                None => missing.push(asset),
            }
        }

        // Recent history for the remainder
        let mut still_missing: Vec<&AssetData> = Vec::new();
        for asset in missing {
            match self
                .storage
                .get_recent_price(asset.id, self.config.recent_window(), now)
                .await
            {
                Ok(Some(point)) => {
                    self.cache_price(
                        &hot_price_key(&asset.external_id),
                        point.price_usd,
                        self.config.hot_ttl(),
                    )
                    .await;
                    resolved.insert(asset.id, PriceQuote::fresh(point.price_usd));
                }
                _ => still_missing.push(asset),
            }
        }

        // One provider multi-get for the miss set
        let mut unresolved: Vec<&AssetData> = Vec::new();
        if !still_missing.is_empty() && self.breaker.can_attempt() {
            let ids: Vec<String> = still_missing
                .iter()
                .map(|asset| asset.external_id.clone())
                .collect();
            match self.provider.get_current_prices(&ids).await {
                Ok(prices) => {
                    self.breaker.record_success();
                    for asset in still_missing {
                        match prices.get(&asset.external_id).copied() {
                            Some(price) => {
                                self.store_price(asset, price).await;
                                resolved.insert(asset.id, PriceQuote::fresh(price));
                            }
                            None => unresolved.push(asset),
                        }
                    }
                }
                Err(err) => {
                    self.breaker.record_failure();
                    warn!("Batch price fetch failed: {}", err);
                    unresolved = still_missing;
                }
            }
        } else {
            unresolved = still_missing;
        }

        // Stale cache for whatever is left
        for asset in unresolved {
            if let Some(price) = self
                .cached_price(&stale_price_key(&asset.external_id))
                .await
            {
                resolved.insert(asset.id, PriceQuote::stale(price, None));
            }
        }

        Ok(resolved)
    }

    async fn cached_price(&self, key: &str) -> Option<Amount> {
        match self.cache.get(key).await {
            Ok(Some(value)) => match Amount::from_dec_str(&value) {
                Ok(price) => Some(price),
                Err(err) => {
                    warn!("Discarding unparseable cached price at {}: {}", key, err);
                    let _ = self.cache.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Cache read failed for {}: {}", key, err);
                None
            }
        }
    }

    async fn cache_price(&self, key: &str, price: Amount, ttl: Duration) {
        if let Err(err) = self.cache.set(key, price.to_string(), ttl).await {
            warn!("Cache write failed for {}: {}", key, err);
        }
    }

    // Write-through after a successful provider fetch
    async fn store_price(&self, asset: &AssetData, price: Amount) {
        let point = PricePoint {
            asset_id: asset.id,
            time: time::now(),
            price_usd: price,
            source: PriceSource::Provider,
        };
        if let Err(err) = self.storage.upsert_price_point(&point).await {
            warn!("Failed to persist price point for {}: {}", asset.symbol, err);
        }
        self.cache_price(
            &hot_price_key(&asset.external_id),
            price,
            self.config.hot_ttl(),
        )
        .await;
        self.cache_price(
            &stale_price_key(&asset.external_id),
            price,
            self.config.stale_ttl(),
        )
        .await;
    }

    pub fn provider(&self) -> &Arc<dyn PriceProvider> {
        &self.provider
    }
}

/// Background refresher keeping caches and history warm for active assets.
/// Never blocks online reads; exits at the next suspension point once
/// shutdown is signalled.
pub fn spawn_price_refresher<S: Storage>(
    oracle: Arc<PriceOracle<S>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(oracle.config.refresh_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Price refresher started (interval: {}s, batch: {})",
            oracle.config.refresh_interval_secs, oracle.config.refresh_batch_size
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("Price refresher observing shutdown");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let assets = match oracle.storage.list_active_assets().await {
                Ok(assets) => assets,
                Err(err) => {
                    error!("Refresher could not list active assets: {}", err);
                    continue;
                }
            };

            for chunk in assets.chunks(oracle.config.refresh_batch_size.max(1)) {
                match oracle.current_prices(chunk).await {
                    Ok(resolved) => {
                        counter!("folio_oracle_refreshed").increment(resolved.len() as u64);
                        if resolved.len() < chunk.len() {
                            debug!(
                                "Refreshed {}/{} assets in batch",
                                resolved.len(),
                                chunk.len()
                            );
                        }
                    }
                    Err(err) => warn!("Price refresh batch failed: {}", err),
                }
            }
        }

        info!("Price refresher stopped");
    })
}
