mod providers;

pub mod memory;

pub use self::{memory::MemoryStorage, providers::*};

use async_trait::async_trait;
use folio_common::{
    account::{Account, AccountCode},
    amount::{Amount, SignedAmount},
    transaction::{Entry, TransactionRecord},
};
use uuid::Uuid;

use crate::core::error::StorageError;

/// Net effect of one committed transaction on a single (account, asset)
/// balance row. Debits and credits are applied together so the row moves
/// once per transaction.
#[derive(Debug, Clone, Default)]
pub struct BalanceDelta {
    pub debit: Amount,
    pub credit: Amount,
    pub usd_debit: Amount,
    pub usd_credit: Amount,
}

/// The persistence port.
///
/// One provider trait per concern, composed here the way the engine consumes
/// them. Writes that must be atomic with the balance invariant go through
/// `begin` and the returned [`StorageTransaction`].
#[async_trait]
pub trait Storage:
    AccountProvider
    + BalanceProvider
    + TransactionProvider
    + WalletProvider
    + AssetProvider
    + PriceHistoryProvider
    + Sync
    + Send
    + 'static
{
    type Transaction: StorageTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StorageError>;
}

/// An open database transaction.
///
/// All writes are staged until `commit`; dropping the value rolls back.
/// `get_balance_for_update` takes (and holds) the row lock that serializes
/// concurrent transactions touching the same (account, asset).
#[async_trait]
pub trait StorageTransaction: Send + Sync {
    /// Resolve an account by code, creating it when absent. Idempotent under
    /// the unique code both within this transaction and across concurrent
    /// ones.
    async fn get_or_create_account(
        &mut self,
        code: &AccountCode,
    ) -> Result<Account, StorageError>;

    /// Current balance under a row-level write lock, including this
    /// transaction's staged effects. Re-acquiring a lock this transaction
    /// already holds is a no-op.
    async fn get_balance_for_update(
        &mut self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<SignedAmount, StorageError>;

    async fn insert_transaction(
        &mut self,
        transaction: &TransactionRecord,
    ) -> Result<(), StorageError>;

    async fn insert_entries(&mut self, entries: &[Entry]) -> Result<(), StorageError>;

    /// Stage a balance movement for an account whose row lock this
    /// transaction holds (the lock is taken if it is not held yet).
    async fn apply_balance_delta(
        &mut self,
        account_id: Uuid,
        asset_id: &str,
        delta: &BalanceDelta,
    ) -> Result<(), StorageError>;

    async fn commit(self) -> Result<(), StorageError>;
}
