//! Read-side enrichment.
//!
//! Pure projection of committed transactions into API views: wallet name
//! joins, display amounts scaled by asset decimals, static type labels and
//! the handler-declared direction. No business logic, no writes.

use std::{collections::HashMap, sync::Arc};

use folio_common::{
    api::{EntryView, TransactionListView, TransactionView},
    asset::DEFAULT_DISCOVERED_DECIMALS,
    transaction::{TransactionPage, TransactionWithEntries},
    utils::format_units,
};
use lazy_static::lazy_static;
use uuid::Uuid;

use crate::core::{
    error::{LedgerError, StorageError},
    handlers::HandlerRegistry,
    storage::Storage,
};

lazy_static! {
    // Labels for transaction types that have no registered handler
    static ref EXTRA_LABELS: HashMap<&'static str, &'static str> =
        HashMap::from([("unknown", "Unknown Transfer")]);
}

pub struct EnrichmentService<S: Storage> {
    storage: Arc<S>,
    registry: Arc<HandlerRegistry<S>>,
}

impl<S: Storage> EnrichmentService<S> {
    pub fn new(storage: Arc<S>, registry: Arc<HandlerRegistry<S>>) -> Self {
        Self { storage, registry }
    }

    pub async fn transaction_view(
        &self,
        item: &TransactionWithEntries,
    ) -> Result<TransactionView, LedgerError> {
        let mut decimals_cache: HashMap<String, u8> = HashMap::new();
        let mut wallet_ids: Vec<Uuid> = Vec::new();
        let mut entries = Vec::with_capacity(item.entries.len());

        for entry in &item.entries {
            let account = self
                .storage
                .get_account(entry.account_id)
                .await?
                .ok_or(StorageError::NotFound)?;
            if let Some(wallet_id) = account.wallet_id {
                if !wallet_ids.contains(&wallet_id) {
                    wallet_ids.push(wallet_id);
                }
            }

            let decimals = match decimals_cache.get(&entry.asset_id) {
                Some(decimals) => *decimals,
                None => {
                    let decimals = self.decimals_for(&entry.asset_id).await?;
                    decimals_cache.insert(entry.asset_id.clone(), decimals);
                    decimals
                }
            };

            entries.push(EntryView {
                id: entry.id,
                account_code: account.code.to_string(),
                debit_credit: entry.debit_credit,
                entry_type: entry.entry_type,
                asset_id: entry.asset_id.clone(),
                amount: entry.amount,
                display_amount: format_units(entry.amount, decimals),
                usd_value: entry.usd_value,
                occurred_at: entry.occurred_at,
            });
        }

        // A single touched wallet lends the view its name; multi-wallet
        // transactions (internal transfers) stay unnamed
        let wallet_name = match wallet_ids.as_slice() {
            [only] => self
                .storage
                .get_wallet(*only)
                .await?
                .map(|wallet| wallet.name),
            _ => None,
        };

        let transaction_type = item.transaction.transaction_type.as_str();
        let type_label = self
            .registry
            .label(transaction_type)
            .or_else(|| EXTRA_LABELS.get(transaction_type).copied())
            .unwrap_or(transaction_type)
            .to_owned();

        Ok(TransactionView {
            id: item.transaction.id,
            transaction_type: transaction_type.to_owned(),
            type_label,
            direction: self.registry.direction(transaction_type),
            source: item.transaction.source.clone(),
            external_id: item.transaction.external_id.clone(),
            status: item.transaction.status,
            occurred_at: item.transaction.occurred_at,
            recorded_at: item.transaction.recorded_at,
            wallet_name,
            error_message: item.transaction.error_message.clone(),
            entries,
        })
    }

    pub async fn transaction_list_view(
        &self,
        page: &TransactionPage,
    ) -> Result<TransactionListView, LedgerError> {
        let mut transactions = Vec::with_capacity(page.transactions.len());
        for item in &page.transactions {
            transactions.push(self.transaction_view(item).await?);
        }
        Ok(TransactionListView {
            transactions,
            total: page.total,
        })
    }

    async fn decimals_for(&self, symbol: &str) -> Result<u8, LedgerError> {
        let candidates = self.storage.list_assets_by_symbol(symbol).await?;
        Ok(candidates
            .first()
            .map(|asset| asset.decimals)
            .unwrap_or(DEFAULT_DISCOVERED_DECIMALS))
    }
}
