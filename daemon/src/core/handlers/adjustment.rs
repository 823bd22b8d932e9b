// Manual balance adjustments.
//
// The caller states the balance a wallet should have; the handler reads the
// current balance under lock and emits the deposit- or withdrawal-shaped
// pair that moves it there. A target equal to the current balance is a
// rejected no-op rather than a silently empty transaction.

use async_trait::async_trait;
use folio_common::{
    account::AccountCode, amount::Amount, api::Direction, transaction::EntryKind,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{
    error::LedgerError,
    handlers::{
        decode_payload, require_wallet, resolve_usd_rate, EntryDraft, HandlerContext,
        TransactionHandler, ValidateContext,
    },
    storage::{Storage, StorageTransaction},
};

#[derive(Debug, Clone, Deserialize)]
struct AdjustmentPayload {
    wallet_id: Uuid,
    asset_id: String,
    new_balance: Amount,
    #[serde(default)]
    usd_rate: Option<Amount>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

pub struct AssetAdjustmentHandler;

#[async_trait]
impl<S: Storage> TransactionHandler<S> for AssetAdjustmentHandler {
    fn transaction_type(&self) -> &'static str {
        "asset_adjustment"
    }

    fn direction(&self) -> Direction {
        Direction::Adjustment
    }

    fn type_label(&self) -> &'static str {
        "Balance Adjustment"
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        let payload: AdjustmentPayload = decode_payload(payload)?;
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
        let payload: AdjustmentPayload = decode_payload(payload)?;
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        let asset = ctx
            .assets
            .resolve_for_wallet(&payload.asset_id, wallet.chain_id)
            .await?;

        let code = AccountCode::wallet(wallet.id, asset.symbol.clone());
        let account = ctx.tx.get_or_create_account(&code).await?;
        let current = ctx
            .tx
            .get_balance_for_update(account.id, &asset.symbol)
            .await?
            .as_amount()
            .unwrap_or_else(Amount::zero);
        let target = payload.new_balance;

        if target == current {
            return Err(LedgerError::NoOpAdjustment);
        }
        let rate = resolve_usd_rate(ctx, &asset, payload.usd_rate).await?;

        let drafts = if target > current {
            let delta = target.checked_sub(current)?;
            vec![
                EntryDraft::debit(
                    code,
                    EntryKind::AssetIncrease,
                    delta,
                    asset.symbol.clone(),
                    rate,
                ),
                EntryDraft::credit(
                    AccountCode::income(asset.symbol.clone()),
                    EntryKind::Income,
                    delta,
                    asset.symbol.clone(),
                    rate,
                ),
            ]
        } else {
            let delta = current.checked_sub(target)?;
            vec![
                EntryDraft::credit(
                    code,
                    EntryKind::AssetDecrease,
                    delta,
                    asset.symbol.clone(),
                    rate,
                ),
                EntryDraft::debit(
                    AccountCode::expense(asset.symbol.clone()),
                    EntryKind::Expense,
                    delta,
                    asset.symbol.clone(),
                    rate,
                ),
            ]
        };

        Ok(drafts)
    }
}
