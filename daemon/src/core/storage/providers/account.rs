//! Account Provider
//!
//! Read access to ledger accounts. Accounts are created lazily inside a
//! storage transaction via `StorageTransaction::get_or_create_account`.

use async_trait::async_trait;
use folio_common::account::{Account, AccountCode};
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait AccountProvider {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StorageError>;

    /// Look an account up by its canonical code.
    async fn get_account_by_code(
        &self,
        code: &AccountCode,
    ) -> Result<Option<Account>, StorageError>;

    /// All accounts attached to a wallet (one per asset it has touched).
    async fn list_wallet_accounts(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<Account>, StorageError>;
}
