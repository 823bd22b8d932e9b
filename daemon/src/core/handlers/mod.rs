//! Transaction handler framework.
//!
//! A handler owns one transaction type: it validates the opaque payload and
//! turns it into a balanced set of entry drafts. The registry maps type keys
//! to handlers and is populated once at startup. Shared behavior (payload
//! decode, wallet checks, rate resolution, funds checks) lives here as small
//! helpers rather than in a base type.

mod adjustment;
mod internal_transfer;
mod swap;
mod transfer_in;
mod transfer_out;

pub use self::{
    adjustment::AssetAdjustmentHandler, internal_transfer::InternalTransferHandler,
    swap::SwapHandler, transfer_in::TransferInHandler, transfer_out::TransferOutHandler,
};

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_common::{
    account::AccountCode,
    amount::Amount,
    api::Direction,
    asset::AssetData,
    chain::ChainId,
    time,
    transaction::{DebitCredit, EntryKind},
    wallet::Wallet,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{
    assets::AssetRegistry,
    error::LedgerError,
    oracle::PriceOracle,
    storage::{Storage, StorageTransaction},
};

/// An entry the ledger still has to resolve: the account is referenced by
/// code, the USD value is computed at commit time.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub account: AccountCode,
    pub debit_credit: DebitCredit,
    pub entry_type: EntryKind,
    pub amount: Amount,
    pub asset_id: String,
    pub usd_rate: Amount,
}

impl EntryDraft {
    pub fn debit(
        account: AccountCode,
        entry_type: EntryKind,
        amount: Amount,
        asset_id: impl Into<String>,
        usd_rate: Amount,
    ) -> Self {
        Self {
            account,
            debit_credit: DebitCredit::Debit,
            entry_type,
            amount,
            asset_id: asset_id.into(),
            usd_rate,
        }
    }

    pub fn credit(
        account: AccountCode,
        entry_type: EntryKind,
        amount: Amount,
        asset_id: impl Into<String>,
        usd_rate: Amount,
    ) -> Self {
        Self {
            account,
            debit_credit: DebitCredit::Credit,
            entry_type,
            amount,
            asset_id: asset_id.into(),
            usd_rate,
        }
    }
}

/// Read-only context for payload validation. No writes, no locks.
pub struct ValidateContext<'a, S: Storage> {
    pub storage: &'a S,
    pub assets: &'a AssetRegistry<S>,
    pub user_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

/// Context for entry generation inside an open storage transaction.
pub struct HandlerContext<'a, S: Storage> {
    pub storage: &'a S,
    pub tx: &'a mut S::Transaction,
    pub oracle: &'a PriceOracle<S>,
    pub assets: &'a AssetRegistry<S>,
    pub transaction_id: Uuid,
    pub source: &'a str,
    pub user_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait TransactionHandler<S: Storage>: Send + Sync {
    /// The registry key this handler owns.
    fn transaction_type(&self) -> &'static str;

    /// Money-flow direction declared to the read side.
    fn direction(&self) -> Direction;

    /// Human label declared to the read side.
    fn type_label(&self) -> &'static str;

    /// Pure validation: reads allowed, writes and locks are not.
    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError>;

    /// Produce the balanced entry set for this payload.
    async fn build_entries(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<Vec<EntryDraft>, LedgerError>;
}

pub struct HandlerRegistry<S: Storage> {
    handlers: HashMap<&'static str, Arc<dyn TransactionHandler<S>>>,
}

impl<S: Storage> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TransactionHandler<S>>) {
        let key = handler.transaction_type();
        if self.handlers.insert(key, handler).is_some() {
            warn!("Handler for '{}' registered twice, keeping the last", key);
        }
    }

    pub fn get(
        &self,
        transaction_type: &str,
    ) -> Result<&Arc<dyn TransactionHandler<S>>, LedgerError> {
        self.handlers
            .get(transaction_type)
            .ok_or_else(|| LedgerError::UnknownTransactionType(transaction_type.to_owned()))
    }

    pub fn direction(&self, transaction_type: &str) -> Option<Direction> {
        self.handlers
            .get(transaction_type)
            .map(|handler| handler.direction())
    }

    pub fn label(&self, transaction_type: &str) -> Option<&'static str> {
        self.handlers
            .get(transaction_type)
            .map(|handler| handler.type_label())
    }

    pub fn transaction_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

/// The registry every deployment starts from.
pub fn default_registry<S: Storage>() -> HandlerRegistry<S> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(TransferInHandler));
    registry.register(Arc::new(TransferOutHandler));
    registry.register(Arc::new(InternalTransferHandler));
    registry.register(Arc::new(SwapHandler));
    registry.register(Arc::new(AssetAdjustmentHandler));
    registry
}

// --- Shared payload pieces --- //

/// Optional gas attachment shared by the spending handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct GasPayload {
    pub chain_id: ChainId,
    pub amount: Amount,
}

pub(crate) fn decode_payload<T: DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, LedgerError> {
    serde_json::from_value(payload.clone())
        .map_err(|err| LedgerError::InvalidPayload(err.to_string()))
}

pub(crate) fn ensure_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount.is_zero() {
        return Err(LedgerError::ZeroAmount);
    }
    Ok(())
}

/// Wallet lookup scoped to the calling principal. A wallet belonging to
/// someone else reads as absent so resource ids cannot be probed.
pub(crate) async fn require_wallet<S: Storage>(
    storage: &S,
    wallet_id: Uuid,
    user_id: Option<Uuid>,
) -> Result<Wallet, LedgerError> {
    let wallet = storage
        .get_wallet(wallet_id)
        .await?
        .ok_or(LedgerError::WalletNotFound(wallet_id))?;
    if let Some(user_id) = user_id {
        if wallet.user_id != user_id {
            return Err(LedgerError::WalletNotFound(wallet_id));
        }
    }
    Ok(wallet)
}

/// Resolve the per-smallest-unit USD rate stored on entries.
///
/// A manual override wins; otherwise today's price comes from the live
/// layers and any other date from history. Quotes are per whole token and
/// get rescaled by the asset's decimals.
pub(crate) async fn resolve_usd_rate<S: Storage>(
    ctx: &HandlerContext<'_, S>,
    asset: &AssetData,
    manual: Option<Amount>,
) -> Result<Amount, LedgerError> {
    let token_rate = match manual {
        Some(rate) => rate,
        None if time::is_today(ctx.occurred_at) => {
            let quote = ctx.oracle.current_price(asset).await?;
            if quote.is_stale() {
                debug!("Using stale price for {}", asset.symbol);
            }
            quote.price
        }
        None => {
            ctx.oracle
                .price_at(asset, time::utc_date(ctx.occurred_at))
                .await?
        }
    };
    Ok(token_rate.per_unit_rate(asset.decimals)?)
}

/// Lock the wallet's balance rows and verify each planned outflow is
/// covered. `outflows` must already aggregate amounts per asset symbol.
pub(crate) async fn ensure_sufficient<S: Storage>(
    ctx: &mut HandlerContext<'_, S>,
    wallet_id: Uuid,
    outflows: &[(String, Amount)],
) -> Result<(), LedgerError> {
    for (asset_id, needed) in outflows {
        let code = AccountCode::wallet(wallet_id, asset_id.clone());
        let account = ctx.tx.get_or_create_account(&code).await?;
        let balance = ctx.tx.get_balance_for_update(account.id, asset_id).await?;
        let available = balance.as_amount().unwrap_or_else(Amount::zero);
        if available < *needed {
            return Err(LedgerError::InsufficientBalance {
                account_code: code.to_string(),
                needed: *needed,
                available,
            });
        }
    }
    Ok(())
}

/// The credit-wallet / debit-gas pair for a gas fee, in the chain's native
/// asset. Returns the native asset alongside so callers can fold the gas
/// amount into their sufficiency checks.
pub(crate) async fn gas_drafts<S: Storage>(
    ctx: &HandlerContext<'_, S>,
    wallet: &Wallet,
    gas: &GasPayload,
) -> Result<(Vec<EntryDraft>, AssetData), LedgerError> {
    ensure_positive(gas.amount)?;
    let native = ctx.assets.native_asset(gas.chain_id).await?;
    let rate = resolve_usd_rate(ctx, &native, None).await.unwrap_or_else(|err| {
        debug!("No gas price for chain {}: {}", gas.chain_id, err);
        Amount::zero()
    });

    let drafts = vec![
        EntryDraft::credit(
            AccountCode::wallet(wallet.id, native.symbol.clone()),
            EntryKind::AssetDecrease,
            gas.amount,
            native.symbol.clone(),
            rate,
        ),
        EntryDraft::debit(
            AccountCode::gas(gas.chain_id),
            EntryKind::GasFee,
            gas.amount,
            native.symbol.clone(),
            rate,
        ),
    ];
    Ok((drafts, native))
}
