//! Transaction Provider
//!
//! Read access to committed transactions and entries, plus the one write
//! that bypasses the commit protocol: FAILED envelopes recorded for
//! observability after a rolled-back attempt.

use async_trait::async_trait;
use folio_common::transaction::{
    Entry, TransactionFilter, TransactionPage, TransactionRecord, TransactionWithEntries,
};
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait TransactionProvider {
    async fn get_transaction_with_entries(
        &self,
        id: Uuid,
    ) -> Result<Option<TransactionWithEntries>, StorageError>;

    /// Idempotency lookup on the unique (source, external_id) pair.
    async fn get_transaction_by_external_id(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<TransactionWithEntries>, StorageError>;

    /// Filtered listing, newest first, with the exact total for the filter.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage, StorageError>;

    /// Every committed entry posted to (account, asset), for reconciliation.
    async fn list_account_entries(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<Vec<Entry>, StorageError>;

    /// Persist a FAILED transaction envelope (no entries, no balance effect).
    async fn insert_failed_transaction(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<(), StorageError>;
}
