// Withdrawals and outgoing transfers, with an optional gas fee in the
// chain's native asset.

use async_trait::async_trait;
use folio_common::{
    account::AccountCode, amount::Amount, api::Direction, transaction::EntryKind,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{
    error::LedgerError,
    handlers::{
        decode_payload, ensure_positive, ensure_sufficient, gas_drafts, require_wallet,
        resolve_usd_rate, EntryDraft, GasPayload, HandlerContext, TransactionHandler,
        ValidateContext,
    },
    storage::Storage,
};

#[derive(Debug, Clone, Deserialize)]
struct TransferOutPayload {
    wallet_id: Uuid,
    asset_id: String,
    amount: Amount,
    #[serde(default)]
    usd_rate: Option<Amount>,
    #[serde(default)]
    gas: Option<GasPayload>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

/// Funds leaving a wallet: credit the wallet's asset account, debit the
/// asset's expense account; the gas fee, when present, moves the native
/// asset into the chain's gas account.
pub struct TransferOutHandler;

#[async_trait]
impl<S: Storage> TransactionHandler<S> for TransferOutHandler {
    fn transaction_type(&self) -> &'static str {
        "transfer_out"
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn type_label(&self) -> &'static str {
        "Withdrawal"
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        let payload: TransferOutPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        if let Some(gas) = &payload.gas {
            ensure_positive(gas.amount)?;
        }
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
        let payload: TransferOutPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        let asset = ctx
            .assets
            .resolve_for_wallet(&payload.asset_id, wallet.chain_id)
            .await?;
        let rate = resolve_usd_rate(ctx, &asset, payload.usd_rate).await?;

        let mut drafts = vec![
            EntryDraft::credit(
                AccountCode::wallet(wallet.id, asset.symbol.clone()),
                EntryKind::AssetDecrease,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
            EntryDraft::debit(
                AccountCode::expense(asset.symbol.clone()),
                EntryKind::Expense,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
        ];

        // Total outflow per asset; gas in the same asset folds into one check
        let mut outflows: Vec<(String, Amount)> = vec![(asset.symbol.clone(), payload.amount)];
        if let Some(gas) = &payload.gas {
            let (gas_entries, native) = gas_drafts(ctx, &wallet, gas).await?;
            drafts.extend(gas_entries);
            match outflows.iter_mut().find(|(symbol, _)| *symbol == native.symbol) {
                Some((_, total)) => *total = total.checked_add(gas.amount)?,
                None => outflows.push((native.symbol.clone(), gas.amount)),
            }
        }
        ensure_sufficient(ctx, wallet.id, &outflows).await?;

        Ok(drafts)
    }
}
