// Read-model DTOs produced by the enrichment service for API consumption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
    amount::Amount,
    transaction::{DebitCredit, EntryKind, TransactionStatus},
};

/// The money-flow direction a handler declares for its transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    Internal,
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryView {
    pub id: Uuid,
    pub account_code: String,
    pub debit_credit: DebitCredit,
    pub entry_type: EntryKind,
    pub asset_id: String,
    pub amount: Amount,
    // Human form: smallest units scaled by the asset's decimals
    pub display_amount: String,
    pub usd_value: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub transaction_type: String,
    pub type_label: String,
    pub direction: Option<Direction>,
    pub source: String,
    pub external_id: Option<String>,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    // Name of the wallet the transaction touches, when exactly one does
    pub wallet_name: Option<String>,
    pub error_message: Option<String>,
    pub entries: Vec<EntryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionListView {
    pub transactions: Vec<TransactionView>,
    pub total: usize,
}
