//! Balance Provider
//!
//! Snapshot reads of the denormalized (account, asset) balance projection.
//! Locked reads live on `StorageTransaction`.

use async_trait::async_trait;
use folio_common::transaction::AccountBalance;
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait BalanceProvider {
    async fn get_balance(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<Option<AccountBalance>, StorageError>;

    async fn list_account_balances(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StorageError>;
}
