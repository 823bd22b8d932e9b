// Deposits and incoming transfers.

use async_trait::async_trait;
use folio_common::{
    account::AccountCode, amount::Amount, api::Direction, transaction::EntryKind,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{
    error::LedgerError,
    handlers::{
        decode_payload, ensure_positive, require_wallet, resolve_usd_rate, EntryDraft,
        HandlerContext, TransactionHandler, ValidateContext,
    },
    storage::Storage,
};

#[derive(Debug, Clone, Deserialize)]
struct TransferInPayload {
    wallet_id: Uuid,
    asset_id: String,
    amount: Amount,
    #[serde(default)]
    usd_rate: Option<Amount>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

/// Funds arriving in a wallet from outside the ledger: debit the wallet's
/// asset account, credit the asset's income account.
pub struct TransferInHandler;

#[async_trait]
impl<S: Storage> TransactionHandler<S> for TransferInHandler {
    fn transaction_type(&self) -> &'static str {
        "transfer_in"
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn type_label(&self) -> &'static str {
        "Deposit"
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        let payload: TransferInPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        ctx.assets
            .resolve_for_wallet(&payload.asset_id, wallet.chain_id)
            .await?;
        Ok(())
    }

    async fn build_entries(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<Vec<EntryDraft>, LedgerError> {
        let payload: TransferInPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        let asset = ctx
            .assets
            .resolve_for_wallet(&payload.asset_id, wallet.chain_id)
            .await?;
        let rate = resolve_usd_rate(ctx, &asset, payload.usd_rate).await?;

        Ok(vec![
            EntryDraft::debit(
                AccountCode::wallet(wallet.id, asset.symbol.clone()),
                EntryKind::AssetIncrease,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
            EntryDraft::credit(
                AccountCode::income(asset.symbol.clone()),
                EntryKind::Income,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
        ])
    }
}
