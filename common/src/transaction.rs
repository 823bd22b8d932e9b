// Transactions and their immutable double-entry postings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::amount::{Amount, SignedAmount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebitCredit {
    Debit,
    Credit,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    AssetIncrease,
    AssetDecrease,
    Income,
    Expense,
    GasFee,
}

/// The aggregate root grouping a balanced set of entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    // Must be a registered handler key
    pub transaction_type: String,
    // Where the transaction came from, e.g. "manual" or "sync"
    pub source: String,
    // (source, external_id) is the idempotency key when set
    pub external_id: Option<String>,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    // The handler's input payload, persisted verbatim
    pub raw_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
}

/// A single debit or credit posting. Never updated or deleted once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub debit_credit: DebitCredit,
    pub entry_type: EntryKind,
    // Strictly positive, in the asset's smallest unit
    pub amount: Amount,
    pub asset_id: String,
    // USD per whole-unit-equivalent, scaled by 10^8; zero when unpriced
    pub usd_rate: Amount,
    // floor(amount * usd_rate / 10^8)
    pub usd_value: Amount,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionWithEntries {
    pub transaction: TransactionRecord,
    pub entries: Vec<Entry>,
}

/// Deterministic read-side ordering: debits first, then entry type, then
/// creation time.
pub fn sort_entries_for_read(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        let side = |e: &Entry| match e.debit_credit {
            DebitCredit::Debit => 0u8,
            DebitCredit::Credit => 1,
        };
        side(a)
            .cmp(&side(b))
            .then(a.entry_type.cmp(&b.entry_type))
            .then(a.created_at.cmp(&b.created_at))
    });
}

/// Filters for transaction listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub wallet_id: Option<Uuid>,
    pub transaction_type: Option<String>,
    pub source: Option<String>,
    pub status: Option<TransactionStatus>,
    pub asset_id: Option<String>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// A page of transactions with the exact total matching the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionWithEntries>,
    pub total: usize,
}

/// Denormalized (account, asset) balance projection. Regenerable from entries.
///
/// The balance is the signed debits-minus-credits sum; wallet accounts are
/// kept non-negative by the ledger, other account types may run negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub asset_id: String,
    pub balance: SignedAmount,
    pub usd_value: SignedAmount,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(side: DebitCredit, kind: EntryKind, created_at: DateTime<Utc>) -> Entry {
        Entry {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            debit_credit: side,
            entry_type: kind,
            amount: Amount::from(1u64),
            asset_id: "BTC".to_owned(),
            usd_rate: Amount::zero(),
            usd_value: Amount::zero(),
            occurred_at: created_at,
            created_at,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn read_order_puts_debits_first() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let mut entries = vec![
            entry(DebitCredit::Credit, EntryKind::Income, t0),
            entry(DebitCredit::Debit, EntryKind::GasFee, t1),
            entry(DebitCredit::Debit, EntryKind::AssetIncrease, t1),
            entry(DebitCredit::Debit, EntryKind::AssetIncrease, t0),
        ];
        sort_entries_for_read(&mut entries);

        assert_eq!(entries[0].debit_credit, DebitCredit::Debit);
        assert_eq!(entries[0].entry_type, EntryKind::AssetIncrease);
        assert_eq!(entries[0].created_at, t0);
        assert_eq!(entries[1].entry_type, EntryKind::AssetIncrease);
        assert_eq!(entries[2].entry_type, EntryKind::GasFee);
        assert_eq!(entries[3].debit_credit, DebitCredit::Credit);
    }

    #[test]
    fn status_strings() {
        assert_eq!(TransactionStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(EntryKind::AssetIncrease.to_string(), "asset_increase");
        assert_eq!(DebitCredit::Debit.to_string(), "DEBIT");
    }
}
