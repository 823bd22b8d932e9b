// Transfers between two wallets of the same user. The user's holdings are
// unchanged overall; only the per-wallet balances move.

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
struct InternalTransferPayload {
    // Source wallet
    wallet_id: Uuid,
    dst_wallet_id: Uuid,
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

pub struct InternalTransferHandler;

impl InternalTransferHandler {
    async fn wallets<S: Storage>(
        storage: &S,
        payload: &InternalTransferPayload,
        user_id: Option<Uuid>,
    ) -> Result<(folio_common::wallet::Wallet, folio_common::wallet::Wallet), LedgerError>
    {
        if payload.wallet_id == payload.dst_wallet_id {
            return Err(LedgerError::SameWallet);
        }
        let src = require_wallet(storage, payload.wallet_id, user_id).await?;
        let dst = require_wallet(storage, payload.dst_wallet_id, user_id).await?;
        if src.user_id != dst.user_id {
            return Err(LedgerError::CrossUserWallet);
        }
        Ok((src, dst))
    }
}

#[async_trait]
impl<S: Storage> TransactionHandler<S> for InternalTransferHandler {
    fn transaction_type(&self) -> &'static str {
        "internal_transfer"
    }

    fn direction(&self) -> Direction {
        Direction::Internal
    }

    fn type_label(&self) -> &'static str {
        "Internal Transfer"
    }

    async fn validate(
        &self,
        ctx: &ValidateContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<(), LedgerError> {
        let payload: InternalTransferPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        if let Some(gas) = &payload.gas {
            ensure_positive(gas.amount)?;
        }
        let (src, _dst) = Self::wallets(ctx.storage, &payload, ctx.user_id).await?;
        ctx.assets
            .resolve_for_wallet(&payload.asset_id, src.chain_id)
            .await?;
        Ok(())
    }

    async fn build_entries(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        payload: &serde_json::Value,
    ) -> Result<Vec<EntryDraft>, LedgerError> {
        let payload: InternalTransferPayload = decode_payload(payload)?;
        ensure_positive(payload.amount)?;
        let (src, dst) = Self::wallets(ctx.storage, &payload, ctx.user_id).await?;
        let asset = ctx
            .assets
            .resolve_for_wallet(&payload.asset_id, src.chain_id)
            .await?;
        let rate = resolve_usd_rate(ctx, &asset, payload.usd_rate).await?;

        let mut drafts = vec![
            EntryDraft::credit(
                AccountCode::wallet(src.id, asset.symbol.clone()),
                EntryKind::AssetDecrease,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
            EntryDraft::debit(
                AccountCode::wallet(dst.id, asset.symbol.clone()),
                EntryKind::AssetIncrease,
                payload.amount,
                asset.symbol.clone(),
                rate,
            ),
        ];

        // The source wallet pays the transfer and any gas
        let mut outflows: Vec<(String, Amount)> = vec![(asset.symbol.clone(), payload.amount)];
        if let Some(gas) = &payload.gas {
            let (gas_entries, native) = gas_drafts(ctx, &src, gas).await?;
            drafts.extend(gas_entries);
            match outflows.iter_mut().find(|(symbol, _)| *symbol == native.symbol) {
                Some((_, total)) => *total = total.checked_add(gas.amount)?,
                None => outflows.push((native.symbol.clone(), gas.amount)),
            }
        }
        ensure_sufficient(ctx, src.id, &outflows).await?;

        Ok(drafts)
    }
}
