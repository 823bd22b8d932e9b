// Asset swaps inside one wallet.
//
// Per-asset balance is preserved by routing both legs through a clearing
// account scoped to the transaction. The clearing account absorbs one
// signed leg per asset and is never reused afterwards.

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
struct SwapPayload {
    wallet_id: Uuid,
    // Asset received by the wallet
    in_asset_id: String,
    in_amount: Amount,
    // Asset given up by the wallet
    out_asset_id: String,
    out_amount: Amount,
    #[serde(default)]
    #[allow(dead_code)]
    protocol: Option<String>,
    #[serde(default)]
    in_usd_rate: Option<Amount>,
    #[serde(default)]
    out_usd_rate: Option<Amount>,
    #[serde(default)]
    gas: Option<GasPayload>,
}

pub struct SwapHandler;

#[async_trait]
impl<S: Storage> TransactionHandler<S> for SwapHandler {
    fn transaction_type(&self) -> &'static str {
        "swap"
    }

    fn direction(&self) -> Direction {
        Direction::Internal
    }

    fn type_label(&self) -> &'static str {
        "Swap"
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        let payload: SwapPayload = decode_payload(payload)?;
        ensure_positive(payload.in_amount)?;
        ensure_positive(payload.out_amount)?;
        if let Some(gas) = &payload.gas {
            ensure_positive(gas.amount)?;
        }
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        let in_asset = ctx
            .assets
            .resolve_for_wallet(&payload.in_asset_id, wallet.chain_id)
            .await?;
        let out_asset = ctx
            .assets
            .resolve_for_wallet(&payload.out_asset_id, wallet.chain_id)
            .await?;
        if in_asset.id == out_asset.id {
            return Err(LedgerError::InvalidPayload(
                "swap requires two distinct assets".to_owned(),
            ));
        }
        Ok(())
    }

    async fn build_entries(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<Vec<EntryDraft>, LedgerError> {
        let payload: SwapPayload = decode_payload(payload)?;
        ensure_positive(payload.in_amount)?;
        ensure_positive(payload.out_amount)?;
        let wallet = require_wallet(ctx.storage, payload.wallet_id, ctx.user_id).await?;
        let in_asset = ctx
            .assets
            .resolve_for_wallet(&payload.in_asset_id, wallet.chain_id)
            .await?;
        let out_asset = ctx
            .assets
            .resolve_for_wallet(&payload.out_asset_id, wallet.chain_id)
            .await?;
        if in_asset.id == out_asset.id {
            return Err(LedgerError::InvalidPayload(
                "swap requires two distinct assets".to_owned(),
            ));
        }
        let in_rate = resolve_usd_rate(ctx, &in_asset, payload.in_usd_rate).await?;
        let out_rate = resolve_usd_rate(ctx, &out_asset, payload.out_usd_rate).await?;

        let clearing = AccountCode::clearing_for(ctx.transaction_id);
        let mut drafts = vec![
            EntryDraft::credit(
                AccountCode::wallet(wallet.id, out_asset.symbol.clone()),
                EntryKind::AssetDecrease,
                payload.out_amount,
                out_asset.symbol.clone(),
                out_rate,
            ),
            EntryDraft::debit(
                clearing.clone(),
                EntryKind::AssetIncrease,
                payload.out_amount,
                out_asset.symbol.clone(),
                out_rate,
            ),
            EntryDraft::credit(
                clearing,
                EntryKind::AssetDecrease,
                payload.in_amount,
                in_asset.symbol.clone(),
                in_rate,
            ),
            EntryDraft::debit(
                AccountCode::wallet(wallet.id, in_asset.symbol.clone()),
                EntryKind::AssetIncrease,
                payload.in_amount,
                in_asset.symbol.clone(),
                in_rate,
            ),
        ];

        let mut outflows: Vec<(String, Amount)> =
            vec![(out_asset.symbol.clone(), payload.out_amount)];
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
