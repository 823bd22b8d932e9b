//! The double-entry ledger engine.
//!
//! `record_transaction` is the single write path: it dispatches the payload
//! to its handler, resolves accounts, enforces the per-asset balance
//! invariant and wallet non-negativity under row locks, and commits the
//! transaction, its entries and the balance projections atomically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use folio_common::{
    account::{Account, AccountCode},
    amount::{Amount, SignedAmount},
    time,
    transaction::{
        sort_entries_for_read, AccountBalance, Entry, TransactionFilter, TransactionPage,
        TransactionRecord, TransactionStatus, TransactionWithEntries,
    },
};
use indexmap::IndexMap;
use metrics::counter;
use uuid::Uuid;

use crate::core::{
    assets::AssetRegistry,
    error::{ErrorKind, LedgerError, StorageError},
    handlers::{EntryDraft, HandlerContext, HandlerRegistry, TransactionHandler, ValidateContext},
    oracle::PriceOracle,
    storage::{BalanceDelta, Storage, StorageTransaction},
};

/// Source tag used by the blockchain sync engine.
pub const SYNC_SOURCE: &str = "sync";

#[derive(Debug, Clone)]
pub struct RecordTransactionRequest {
    pub transaction_type: String,
    pub source: String,
    pub external_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    // Calling principal; wallet access is scoped to it when present
    pub user_id: Option<Uuid>,
}

/// Result of recomputing a denormalized balance from its entries.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub account_id: Uuid,
    pub asset_id: String,
    pub stored: SignedAmount,
    pub computed: SignedAmount,
}

impl Reconciliation {
    pub fn is_balanced(&self) -> bool {
        self.stored == self.computed
    }

    /// `computed - stored`; `None` when the projection matches the entries.
    pub fn discrepancy(&self) -> Option<SignedAmount> {
        if self.is_balanced() {
            return None;
        }
        Some(signed_diff(self.computed, self.stored))
    }
}

// a - b over signed values; balances stay far below the 78-digit cap so the
// arithmetic cannot fail in practice
fn signed_diff(a: SignedAmount, b: SignedAmount) -> SignedAmount {
    let result = if b.is_negative() {
        a.checked_add(b.magnitude())
    } else {
        a.checked_sub(b.magnitude())
    };
    result.unwrap_or_else(|_| SignedAmount::zero())
}

pub struct Ledger<S: Storage> {
    storage: Arc<S>,
    registry: Arc<HandlerRegistry<S>>,
    oracle: Arc<PriceOracle<S>>,
    assets: Arc<AssetRegistry<S>>,
}

impl<S: Storage> Ledger<S> {
    pub fn new(
        storage: Arc<S>,
        registry: Arc<HandlerRegistry<S>>,
        oracle: Arc<PriceOracle<S>>,
        assets: Arc<AssetRegistry<S>>,
    ) -> Self {
        Self {
            storage,
            registry,
            oracle,
            assets,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry<S>> {
        &self.registry
    }

    pub fn assets(&self) -> &Arc<AssetRegistry<S>> {
        &self.assets
    }

    pub fn oracle(&self) -> &Arc<PriceOracle<S>> {
        &self.oracle
    }

    /// Record a transaction through its handler and commit it atomically.
    ///
    /// Re-submitting an already-recorded `(source, external_id)` pair is an
    /// idempotent success returning the existing transaction. A transient
    /// persistence conflict is retried once with fresh locks.
    pub async fn record_transaction(
        &self,
        request: RecordTransactionRequest,
    ) -> Result<TransactionWithEntries, LedgerError> {
        let handler = self.registry.get(&request.transaction_type)?.clone();
        let now = time::now();
        if request.occurred_at > now {
            return Err(LedgerError::OccurredInFuture(request.occurred_at));
        }

        // Fast idempotency path before any work
        if let Some(existing) = self.find_existing(&request).await? {
            debug!(
                "Duplicate ({}, {:?}) resolves to transaction {}",
                request.source, request.external_id, existing.transaction.id
            );
            return Ok(existing);
        }

        let validate_ctx = ValidateContext {
            storage: self.storage.as_ref(),
            assets: self.assets.as_ref(),
            user_id: request.user_id,
            occurred_at: request.occurred_at,
        };
        let validation = handler.validate(&validate_ctx, &request.payload).await;
        if let Err(err) = validation {
            self.maybe_record_failure_envelope(&request, &err).await;
            return Err(err);
        }

        let mut result = self.commit_attempt(handler.as_ref(), &request).await;
        if result.as_ref().err().is_some_and(|err| err.is_transient()) {
            warn!(
                "Transient conflict committing '{}', retrying once",
                request.transaction_type
            );
            result = self.commit_attempt(handler.as_ref(), &request).await;
        }

        match result {
            Ok(committed) => {
                counter!("folio_ledger_transactions", "type" => request.transaction_type)
                    .increment(1);
                Ok(committed)
            }
            Err(LedgerError::Storage(StorageError::IdempotencyConflict { .. })) => {
                // Lost a race to a concurrent identical submission
                let existing = self
                    .find_existing(&request)
                    .await?
                    .ok_or(StorageError::NotFound)
                    .map_err(LedgerError::Storage)?;
                Ok(existing)
            }
            Err(err) => {
                self.maybe_record_failure_envelope(&request, &err).await;
                Err(err)
            }
        }
    }

    async fn find_existing(
        &self,
        request: &RecordTransactionRequest,
    ) -> Result<Option<TransactionWithEntries>, LedgerError> {
        let Some(external_id) = &request.external_id else {
            return Ok(None);
        };
        let existing = self
            .storage
            .get_transaction_by_external_id(&request.source, external_id)
            .await?;
        Ok(existing.map(sorted))
    }

    async fn commit_attempt(
        &self,
        handler: &dyn TransactionHandler<S>,
        request: &RecordTransactionRequest,
    ) -> Result<TransactionWithEntries, LedgerError> {
        let mut tx = self.storage.begin().await?;
        let transaction_id = Uuid::new_v4();

        let drafts = {
            let mut ctx = HandlerContext {
                storage: self.storage.as_ref(),
                tx: &mut tx,
                oracle: self.oracle.as_ref(),
                assets: self.assets.as_ref(),
                transaction_id,
                source: &request.source,
                user_id: request.user_id,
                occurred_at: request.occurred_at,
            };
            handler.build_entries(&mut ctx, &request.payload).await?
        };

        if drafts.len() < 2 {
            return Err(LedgerError::TooFewEntries);
        }
        for draft in &drafts {
            if draft.amount.is_zero() {
                return Err(LedgerError::ZeroAmount);
            }
        }
        verify_balanced(&drafts)?;

        // Resolve every referenced account, creating on first use
        let mut accounts: IndexMap<String, Account> = IndexMap::new();
        for draft in &drafts {
            let key = draft.account.to_string();
            if !accounts.contains_key(&key) {
                let account = tx.get_or_create_account(&draft.account).await?;
                accounts.insert(key, account);
            }
        }

        let now = time::now();
        let mut entries = Vec::with_capacity(drafts.len());
        let mut deltas: IndexMap<(Uuid, String), (Account, BalanceDelta)> = IndexMap::new();
        for draft in &drafts {
            let account = accounts
                .get(&draft.account.to_string())
                .expect("account resolved above")
                .clone();
            let usd_value = draft.amount.usd_value(draft.usd_rate)?;

            let (_, delta) = deltas
                .entry((account.id, draft.asset_id.clone()))
                .or_insert_with(|| (account.clone(), BalanceDelta::default()));
            match draft.debit_credit {
                folio_common::transaction::DebitCredit::Debit => {
                    delta.debit = delta.debit.checked_add(draft.amount)?;
                    delta.usd_debit = delta.usd_debit.checked_add(usd_value)?;
                }
                folio_common::transaction::DebitCredit::Credit => {
                    delta.credit = delta.credit.checked_add(draft.amount)?;
                    delta.usd_credit = delta.usd_credit.checked_add(usd_value)?;
                }
            }

            entries.push(Entry {
                id: Uuid::new_v4(),
                transaction_id,
                account_id: account.id,
                debit_credit: draft.debit_credit,
                entry_type: draft.entry_type,
                amount: draft.amount,
                asset_id: draft.asset_id.clone(),
                usd_rate: draft.usd_rate,
                usd_value,
                occurred_at: request.occurred_at,
                created_at: now,
                metadata: serde_json::Value::Null,
            });
        }

        // Wallet balances must stay non-negative after posting; the row lock
        // taken here serializes concurrent spends of the same balance
        for ((account_id, asset_id), (account, delta)) in &deltas {
            if !account.account_type.requires_non_negative_balance() {
                continue;
            }
            let current = tx.get_balance_for_update(*account_id, asset_id).await?;
            let post = current
                .checked_add(delta.debit)?
                .checked_sub(delta.credit)?;
            if post.is_negative() {
                return Err(LedgerError::InsufficientBalance {
                    account_code: account.code.to_string(),
                    needed: delta
                        .credit
                        .checked_sub(delta.debit)
                        .unwrap_or_else(|_| Amount::zero()),
                    available: current.as_amount().unwrap_or_else(Amount::zero),
                });
            }
        }

        let record = TransactionRecord {
            id: transaction_id,
            transaction_type: request.transaction_type.clone(),
            source: request.source.clone(),
            external_id: request.external_id.clone(),
            status: TransactionStatus::Completed,
            occurred_at: request.occurred_at,
            recorded_at: now,
            raw_data: request.payload.clone(),
            metadata: serde_json::Value::Null,
            error_message: None,
        };

        tx.insert_transaction(&record).await?;
        tx.insert_entries(&entries).await?;
        for ((account_id, asset_id), (_, delta)) in &deltas {
            tx.apply_balance_delta(*account_id, asset_id, delta).await?;
        }
        tx.commit().await?;

        sort_entries_for_read(&mut entries);
        Ok(TransactionWithEntries {
            transaction: record,
            entries,
        })
    }

    // A sync-sourced payload that decoded but failed semantically leaves a
    // FAILED envelope behind for observability. Manual submissions do not.
    async fn maybe_record_failure_envelope(
        &self,
        request: &RecordTransactionRequest,
        err: &LedgerError,
    ) {
        if request.source != SYNC_SOURCE {
            return;
        }
        if matches!(err, LedgerError::InvalidPayload(_)) {
            return;
        }
        let recordable = matches!(
            err.kind(),
            ErrorKind::Validation | ErrorKind::PriceUnavailable | ErrorKind::InsufficientBalance
        );
        if !recordable {
            return;
        }

        let envelope = TransactionRecord {
            id: Uuid::new_v4(),
            transaction_type: request.transaction_type.clone(),
            source: request.source.clone(),
            external_id: request.external_id.clone(),
            status: TransactionStatus::Failed,
            occurred_at: request.occurred_at,
            recorded_at: time::now(),
            raw_data: request.payload.clone(),
            metadata: serde_json::Value::Null,
            error_message: Some(err.to_string()),
        };
        if let Err(persist_err) = self.storage.insert_failed_transaction(&envelope).await {
            warn!("Could not record failure envelope: {}", persist_err);
        } else {
            counter!("folio_ledger_failure_envelopes").increment(1);
        }
    }

    /// Idempotent account creation by canonical code.
    pub async fn get_or_create_account(
        &self,
        code: &AccountCode,
    ) -> Result<Account, LedgerError> {
        if let Some(account) = self.storage.get_account_by_code(code).await? {
            return Ok(account);
        }
        let mut tx = self.storage.begin().await?;
        let account = tx.get_or_create_account(code).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn get_account_by_code(
        &self,
        code: &AccountCode,
    ) -> Result<Account, LedgerError> {
        self.storage
            .get_account_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    /// Snapshot balance read; absent rows read as zero.
    pub async fn get_account_balance(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<AccountBalance, LedgerError> {
        Ok(self
            .storage
            .get_balance(account_id, asset_id)
            .await?
            .unwrap_or_else(|| AccountBalance {
                account_id,
                asset_id: asset_id.to_owned(),
                balance: SignedAmount::zero(),
                usd_value: SignedAmount::zero(),
                last_updated: time::now(),
            }))
    }

    pub async fn get_transaction_with_entries(
        &self,
        id: Uuid,
    ) -> Result<TransactionWithEntries, LedgerError> {
        self.storage
            .get_transaction_with_entries(id)
            .await?
            .map(sorted)
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage, LedgerError> {
        let mut page = self.storage.list_transactions(filter).await?;
        for item in &mut page.transactions {
            sort_entries_for_read(&mut item.entries);
        }
        Ok(page)
    }

    /// Recompute a denormalized balance from the entry log.
    pub async fn reconcile_balance(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<Reconciliation, LedgerError> {
        let entries = self
            .storage
            .list_account_entries(account_id, asset_id)
            .await?;
        let mut computed = SignedAmount::zero();
        for entry in &entries {
            computed = match entry.debit_credit {
                folio_common::transaction::DebitCredit::Debit => {
                    computed.checked_add(entry.amount)?
                }
                folio_common::transaction::DebitCredit::Credit => {
                    computed.checked_sub(entry.amount)?
                }
            };
        }
        let stored = self
            .storage
            .get_balance(account_id, asset_id)
            .await?
            .map(|row| row.balance)
            .unwrap_or_else(SignedAmount::zero);

        Ok(Reconciliation {
            account_id,
            asset_id: asset_id.to_owned(),
            stored,
            computed,
        })
    }
}

fn sorted(mut item: TransactionWithEntries) -> TransactionWithEntries {
    sort_entries_for_read(&mut item.entries);
    item
}

// Per-asset debits must equal credits across the draft set
fn verify_balanced(drafts: &[EntryDraft]) -> Result<(), LedgerError> {
    let mut per_asset: IndexMap<&str, (Amount, Amount)> = IndexMap::new();
    for draft in drafts {
        let (debits, credits) = per_asset
            .entry(draft.asset_id.as_str())
            .or_insert_with(|| (Amount::zero(), Amount::zero()));
        match draft.debit_credit {
            folio_common::transaction::DebitCredit::Debit => {
                *debits = debits.checked_add(draft.amount)?;
            }
            folio_common::transaction::DebitCredit::Credit => {
                *credits = credits.checked_add(draft.amount)?;
            }
        }
    }
    for (asset_id, (debits, credits)) in per_asset {
        if debits != credits {
            return Err(LedgerError::Unbalanced {
                asset_id: asset_id.to_owned(),
                debits,
                credits,
            });
        }
    }
    Ok(())
}
