// Service-wide error types.
//
// `LedgerError` is what every core operation returns; `ErrorKind` is the
// classification seam a transport layer maps onto status codes. The mapping
// itself lives outside this crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use folio_common::{
    account::AccountCodeError,
    amount::{Amount, AmountError},
    chain::ChainId,
};
use thiserror::Error;
use uuid::Uuid;

/// Coarse error classes, one per §-of-taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Conflict,
    InsufficientBalance,
    PriceUnavailable,
    ProviderTransient,
    PersistenceTransient,
    PersistenceFatal,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("row not found")]
    NotFound,
    #[error("transaction already recorded for source '{tx_source}' external id '{external_id}'")]
    IdempotencyConflict {
        tx_source: String,
        external_id: String,
    },
    #[error("unique constraint violation on {0}")]
    UniqueViolation(String),
    #[error("timed out waiting for a balance row lock")]
    LockTimeout,
    #[error("balance underflow for account {account_id} asset {asset_id}")]
    BalanceUnderflow { account_id: Uuid, asset_id: String },
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache operation timed out")]
    Timeout,
    #[error("cache backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("price provider rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("price provider request failed: {0}")]
    Request(String),
    #[error("price provider timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("blockchain provider rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("blockchain provider request failed: {0}")]
    Request(String),
    #[error("blockchain provider timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown transaction type '{0}'")]
    UnknownTransactionType(String),
    #[error("occurred_at {0} is in the future")]
    OccurredInFuture(DateTime<Utc>),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("amount must be strictly positive")]
    ZeroAmount,
    #[error("unknown asset '{0}'")]
    UnknownAsset(String),
    #[error("symbol '{symbol}' exists on multiple chains: {chains:?}")]
    AmbiguousSymbol {
        symbol: String,
        chains: Vec<Option<ChainId>>,
    },
    #[error("no native asset registered for chain {0}")]
    UnknownNativeAsset(ChainId),
    #[error("wallet {0} not found")]
    WalletNotFound(Uuid),
    #[error("wallets belong to different users")]
    CrossUserWallet,
    #[error("source and destination wallets are the same")]
    SameWallet,
    #[error("adjustment target equals the current balance")]
    NoOpAdjustment,
    #[error("insufficient balance on {account_code}: need {needed}, have {available}")]
    InsufficientBalance {
        account_code: String,
        needed: Amount,
        available: Amount,
    },
    #[error("entries do not balance for asset {asset_id}: debits {debits}, credits {credits}")]
    Unbalanced {
        asset_id: String,
        debits: Amount,
        credits: Amount,
    },
    #[error("transaction must have at least two entries")]
    TooFewEntries,
    #[error("no price available for '{0}'")]
    PriceUnavailable(String),
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),
    #[error(transparent)]
    AccountCode(#[from] AccountCodeError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::UnknownTransactionType(_)
            | LedgerError::OccurredInFuture(_)
            | LedgerError::InvalidPayload(_)
            | LedgerError::ZeroAmount
            | LedgerError::UnknownAsset(_)
            | LedgerError::AmbiguousSymbol { .. }
            | LedgerError::UnknownNativeAsset(_)
            | LedgerError::SameWallet
            | LedgerError::NoOpAdjustment
            | LedgerError::TooFewEntries
            | LedgerError::AccountCode(_)
            | LedgerError::Amount(_) => ErrorKind::Validation,
            LedgerError::CrossUserWallet => ErrorKind::Authorization,
            // Foreign-resource lookups answer "not found" to prevent
            // enumeration, so missing and unauthorized collapse here
            LedgerError::WalletNotFound(_)
            | LedgerError::AccountNotFound(_)
            | LedgerError::TransactionNotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LedgerError::PriceUnavailable(_) => ErrorKind::PriceUnavailable,
            LedgerError::Provider(_) | LedgerError::Chain(_) => ErrorKind::ProviderTransient,
            LedgerError::Storage(err) => match err {
                StorageError::NotFound => ErrorKind::NotFound,
                StorageError::IdempotencyConflict { .. } => ErrorKind::Conflict,
                StorageError::LockTimeout => ErrorKind::PersistenceTransient,
                StorageError::UniqueViolation(_)
                | StorageError::BalanceUnderflow { .. }
                | StorageError::Amount(_)
                | StorageError::Backend(_) => ErrorKind::PersistenceFatal,
            },
            // A handler produced an unbalanced set; that is a bug, not bad input
            LedgerError::Unbalanced { .. } => ErrorKind::PersistenceFatal,
        }
    }

    // Whether one retry with fresh locks is worth attempting
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::PersistenceTransient)
    }
}
