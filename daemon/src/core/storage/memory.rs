//! In-memory storage backend.
//!
//! Reference implementation of the persistence port. Committed state lives
//! behind one RwLock; open transactions stage their writes locally and hold
//! per-(account, asset) row locks, so concurrent transactions on the same
//! balance serialize exactly like `SELECT ... FOR UPDATE` would. Lock
//! acquisition times out and surfaces as a transient conflict, which is the
//! in-memory analog of a deadlock abort.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use folio_common::{
    account::{Account, AccountCode},
    amount::SignedAmount,
    chain::{BlockNumber, ChainId},
    price::PricePoint,
    time,
    transaction::{
        AccountBalance, Entry, TransactionFilter, TransactionPage, TransactionRecord,
        TransactionStatus, TransactionWithEntries,
    },
    wallet::{SyncStatus, Wallet},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::{
    config::{BALANCE_LOCK_TIMEOUT_SECS, MAX_ERROR_BACKOFF_MULTIPLIER},
    core::{
        error::StorageError,
        storage::{
            AccountProvider, AssetProvider, BalanceDelta, BalanceProvider,
            PriceHistoryProvider, Storage, StorageTransaction, TransactionProvider,
            WalletProvider,
        },
    },
};
use folio_common::asset::AssetData;

type RowKey = (Uuid, String);

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    accounts_by_code: HashMap<String, Uuid>,
    transactions: HashMap<Uuid, TransactionRecord>,
    transactions_by_external: HashMap<(String, String), Uuid>,
    entries_by_transaction: HashMap<Uuid, Vec<Entry>>,
    entries_by_account: HashMap<RowKey, Vec<Entry>>,
    balances: HashMap<RowKey, AccountBalance>,
    wallets: HashMap<Uuid, Wallet>,
    assets: HashMap<Uuid, AssetData>,
    price_points: HashMap<Uuid, BTreeMap<DateTime<Utc>, PricePoint>>,
}

struct StoreInner {
    state: RwLock<State>,
    // Row locks outlive the transactions holding them; the maps themselves
    // are only touched briefly to fetch or create a lock handle
    balance_locks: StdMutex<HashMap<RowKey, Arc<AsyncMutex<()>>>>,
    account_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    lock_timeout: Duration,
}

impl StoreInner {
    fn balance_lock(&self, key: &RowKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.balance_locks.lock().expect("balance lock map poisoned");
        locks.entry(key.clone()).or_default().clone()
    }

    fn account_lock(&self, code: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.account_locks.lock().expect("account lock map poisoned");
        locks.entry(code.to_owned()).or_default().clone()
    }

    async fn acquire(
        &self,
        lock: Arc<AsyncMutex<()>>,
    ) -> Result<OwnedMutexGuard<()>, StorageError> {
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StorageError::LockTimeout)
    }
}

#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(BALANCE_LOCK_TIMEOUT_SECS))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(State::default()),
                balance_locks: StdMutex::new(HashMap::new()),
                account_locks: StdMutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }
}

impl State {
    fn with_entries(&self, transaction: &TransactionRecord) -> TransactionWithEntries {
        TransactionWithEntries {
            transaction: transaction.clone(),
            entries: self
                .entries_by_transaction
                .get(&transaction.id)
                .cloned()
                .unwrap_or_default(),
        }
    }

    // Whether a transaction touches the wallet through any of its entries
    fn touches_wallet(&self, transaction_id: Uuid, wallet_id: Uuid) -> bool {
        self.entries_by_transaction
            .get(&transaction_id)
            .map(|entries| {
                entries.iter().any(|entry| {
                    self.accounts
                        .get(&entry.account_id)
                        .and_then(|account| account.wallet_id)
                        == Some(wallet_id)
                })
            })
            .unwrap_or(false)
    }

    fn matches(&self, transaction: &TransactionRecord, filter: &TransactionFilter) -> bool {
        if let Some(wanted) = &filter.transaction_type {
            if transaction.transaction_type != *wanted {
                return false;
            }
        }
        if let Some(wanted) = &filter.source {
            if transaction.source != *wanted {
                return false;
            }
        }
        if let Some(wanted) = filter.status {
            if transaction.status != wanted {
                return false;
            }
        }
        if let Some(after) = filter.occurred_after {
            if transaction.occurred_at < after {
                return false;
            }
        }
        if let Some(before) = filter.occurred_before {
            if transaction.occurred_at > before {
                return false;
            }
        }
        if let Some(asset_id) = &filter.asset_id {
            let touches_asset = self
                .entries_by_transaction
                .get(&transaction.id)
                .map(|entries| entries.iter().any(|entry| entry.asset_id == *asset_id))
                .unwrap_or(false);
            if !touches_asset {
                return false;
            }
        }
        if let Some(wallet_id) = filter.wallet_id {
            if !self.touches_wallet(transaction.id, wallet_id) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl AccountProvider for MemoryStorage {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn get_account_by_code(
        &self,
        code: &AccountCode,
    ) -> Result<Option<Account>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .accounts_by_code
            .get(&code.to_string())
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn list_wallet_accounts(
        &self,
        wallet_id: Uuid,
    ) -> Result<Vec<Account>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .accounts
            .values()
            .filter(|account| account.wallet_id == Some(wallet_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BalanceProvider for MemoryStorage {
    async fn get_balance(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<Option<AccountBalance>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .balances
            .get(&(account_id, asset_id.to_owned()))
            .cloned())
    }

    async fn list_account_balances(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountBalance>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .balances
            .values()
            .filter(|balance| balance.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionProvider for MemoryStorage {
    async fn get_transaction_with_entries(
        &self,
        id: Uuid,
    ) -> Result<Option<TransactionWithEntries>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .transactions
            .get(&id)
            .map(|transaction| state.with_entries(transaction)))
    }

    async fn get_transaction_by_external_id(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<TransactionWithEntries>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .transactions_by_external
            .get(&(source.to_owned(), external_id.to_owned()))
            .and_then(|id| state.transactions.get(id))
            .map(|transaction| state.with_entries(transaction)))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage, StorageError> {
        let state = self.inner.state.read().await;
        let mut matched: Vec<&TransactionRecord> = state
            .transactions
            .values()
            .filter(|transaction| state.matches(transaction, filter))
            .collect();
        // Newest first, id as the tie-break so pagination is stable
        matched.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matched.len();
        let offset = filter.offset.unwrap_or(0).min(total);
        let limit = filter.limit.unwrap_or(total);
        let transactions = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|transaction| state.with_entries(transaction))
            .collect();

        Ok(TransactionPage {
            transactions,
            total,
        })
    }

    async fn list_account_entries(
        &self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<Vec<Entry>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .entries_by_account
            .get(&(account_id, asset_id.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_failed_transaction(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<(), StorageError> {
        debug_assert_eq!(transaction.status, TransactionStatus::Failed);
        let mut state = self.inner.state.write().await;
        if let Some(external_id) = &transaction.external_id {
            let key = (transaction.source.clone(), external_id.clone());
            // Re-recording the same failure is a no-op
            if state.transactions_by_external.contains_key(&key) {
                return Ok(());
            }
            state.transactions_by_external.insert(key, transaction.id);
        }
        state
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }
}

#[async_trait]
impl WalletProvider for MemoryStorage {
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state.wallets.get(&id).cloned())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StorageError> {
        let mut state = self.inner.state.write().await;
        let duplicate = state.wallets.values().any(|existing| {
            existing.user_id == wallet.user_id
                && existing.chain_id == wallet.chain_id
                && existing.address_key() == wallet.address_key()
        });
        if duplicate {
            return Err(StorageError::UniqueViolation(
                "wallets(user_id, chain_id, address)".to_owned(),
            ));
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn list_wallets(&self) -> Result<Vec<Wallet>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state.wallets.values().cloned().collect())
    }

    async fn list_user_wallets_on_chain(
        &self,
        user_id: Uuid,
        chain_id: ChainId,
    ) -> Result<Vec<Wallet>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .wallets
            .values()
            .filter(|wallet| wallet.user_id == user_id && wallet.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn list_wallets_due_for_sync(
        &self,
        now: DateTime<Utc>,
        poll_interval: Duration,
        stale_claim: Duration,
    ) -> Result<Vec<Wallet>, StorageError> {
        let poll = chrono::Duration::from_std(poll_interval)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let stale = chrono::Duration::from_std(stale_claim)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let state = self.inner.state.read().await;
        Ok(state
            .wallets
            .values()
            .filter(|wallet| match wallet.sync_status {
                SyncStatus::Pending => true,
                SyncStatus::Synced => wallet
                    .last_sync_at
                    .map(|at| at + poll <= now)
                    .unwrap_or(true),
                SyncStatus::Error => {
                    // Exponential backoff on consecutive failures, capped
                    let multiplier =
                        2u32.saturating_pow(wallet.sync_failures.min(31))
                            .min(MAX_ERROR_BACKOFF_MULTIPLIER);
                    let base = wallet.sync_started_at.or(wallet.last_sync_at);
                    base.map(|at| at + poll * multiplier as i32 <= now).unwrap_or(true)
                }
                SyncStatus::Syncing => wallet
                    .sync_started_at
                    .map(|at| at + stale <= now)
                    .unwrap_or(true),
            })
            .cloned()
            .collect())
    }

    async fn claim_wallet_for_sync(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_claim: Duration,
    ) -> Result<bool, StorageError> {
        let stale = chrono::Duration::from_std(stale_claim)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut state = self.inner.state.write().await;
        let wallet = state.wallets.get_mut(&id).ok_or(StorageError::NotFound)?;

        if wallet.sync_status == SyncStatus::Syncing {
            let claim_is_live = wallet
                .sync_started_at
                .map(|at| at + stale > now)
                .unwrap_or(false);
            if claim_is_live {
                return Ok(false);
            }
        }

        wallet.sync_status = SyncStatus::Syncing;
        wallet.sync_started_at = Some(now);
        Ok(true)
    }

    async fn complete_wallet_sync(
        &self,
        id: Uuid,
        last_sync_block: Option<BlockNumber>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.inner.state.write().await;
        let wallet = state.wallets.get_mut(&id).ok_or(StorageError::NotFound)?;
        wallet.sync_status = SyncStatus::Synced;
        wallet.last_sync_at = Some(now);
        wallet.sync_started_at = None;
        wallet.sync_error = None;
        wallet.sync_failures = 0;
        if last_sync_block.is_some() {
            wallet.last_sync_block = last_sync_block;
        }
        Ok(())
    }

    async fn fail_wallet_sync(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.inner.state.write().await;
        let wallet = state.wallets.get_mut(&id).ok_or(StorageError::NotFound)?;
        wallet.sync_status = SyncStatus::Error;
        wallet.sync_error = Some(error.to_owned());
        wallet.sync_failures = wallet.sync_failures.saturating_add(1);
        wallet.sync_started_at = Some(now);
        Ok(())
    }
}

#[async_trait]
impl AssetProvider for MemoryStorage {
    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetData>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state.assets.get(&id).cloned())
    }

    async fn get_asset_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AssetData>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .assets
            .values()
            .find(|asset| asset.external_id == external_id)
            .cloned())
    }

    async fn list_assets_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Vec<AssetData>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .assets
            .values()
            .filter(|asset| asset.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
            .collect())
    }

    async fn list_active_assets(&self) -> Result<Vec<AssetData>, StorageError> {
        let state = self.inner.state.read().await;
        Ok(state
            .assets
            .values()
            .filter(|asset| asset.is_active)
            .cloned()
            .collect())
    }

    async fn insert_asset_if_absent(
        &self,
        asset: &AssetData,
    ) -> Result<AssetData, StorageError> {
        let mut state = self.inner.state.write().await;
        let existing = state.assets.values().find(|candidate| {
            candidate.external_id == asset.external_id
                || (candidate.symbol.eq_ignore_ascii_case(&asset.symbol)
                    && candidate.chain_id == asset.chain_id)
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        state.assets.insert(asset.id, asset.clone());
        Ok(asset.clone())
    }
}

#[async_trait]
impl PriceHistoryProvider for MemoryStorage {
    async fn upsert_price_point(&self, point: &PricePoint) -> Result<(), StorageError> {
        let mut state = self.inner.state.write().await;
        state
            .price_points
            .entry(point.asset_id)
            .or_default()
            .insert(point.time, point.clone());
        Ok(())
    }

    async fn get_recent_price(
        &self,
        asset_id: Uuid,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<PricePoint>, StorageError> {
        let cutoff = now
            - chrono::Duration::from_std(max_age)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        let state = self.inner.state.read().await;
        Ok(state.price_points.get(&asset_id).and_then(|points| {
            points
                .range(cutoff..=now)
                .next_back()
                .map(|(_, point)| point.clone())
        }))
    }

    async fn get_price_at(
        &self,
        asset_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PricePoint>, StorageError> {
        let start = time::date_start(date);
        let end = start + chrono::Duration::days(1);
        let state = self.inner.state.read().await;
        Ok(state.price_points.get(&asset_id).and_then(|points| {
            points
                .range(start..end)
                .next_back()
                .map(|(_, point)| point.clone())
        }))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StorageError> {
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged_accounts: HashMap::new(),
            staged_transaction: None,
            staged_entries: Vec::new(),
            staged_balances: HashMap::new(),
            balance_guards: HashMap::new(),
            account_guards: HashMap::new(),
        })
    }
}

/// An open transaction on [`MemoryStorage`]. Dropping it rolls back: staged
/// writes are discarded and every held row lock is released.
pub struct MemoryTransaction {
    inner: Arc<StoreInner>,
    staged_accounts: HashMap<String, Account>,
    staged_transaction: Option<TransactionRecord>,
    staged_entries: Vec<Entry>,
    staged_balances: HashMap<RowKey, AccountBalance>,
    balance_guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    account_guards: HashMap<String, OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    async fn ensure_row_lock(&mut self, key: &RowKey) -> Result<(), StorageError> {
        if self.balance_guards.contains_key(key) {
            return Ok(());
        }
        let lock = self.inner.balance_lock(key);
        let guard = self.inner.acquire(lock).await?;
        self.balance_guards.insert(key.clone(), guard);
        Ok(())
    }

    async fn current_balance(&self, key: &RowKey) -> Option<AccountBalance> {
        if let Some(staged) = self.staged_balances.get(key) {
            return Some(staged.clone());
        }
        let state = self.inner.state.read().await;
        state.balances.get(key).cloned()
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn get_or_create_account(
        &mut self,
        code: &AccountCode,
    ) -> Result<Account, StorageError> {
        let key = code.to_string();
        if let Some(account) = self.staged_accounts.get(&key) {
            return Ok(account.clone());
        }
        {
            let state = self.inner.state.read().await;
            if let Some(account) = state
                .accounts_by_code
                .get(&key)
                .and_then(|id| state.accounts.get(id))
            {
                return Ok(account.clone());
            }
        }

        // Serialize creation of this code across transactions, then re-check:
        // the race loser sees the winner's committed row
        if !self.account_guards.contains_key(&key) {
            let lock = self.inner.account_lock(&key);
            let guard = self.inner.acquire(lock).await?;
            self.account_guards.insert(key.clone(), guard);

            let state = self.inner.state.read().await;
            if let Some(account) = state
                .accounts_by_code
                .get(&key)
                .and_then(|id| state.accounts.get(id))
            {
                return Ok(account.clone());
            }
        }

        let account = Account::from_code(code.clone(), Utc::now());
        self.staged_accounts.insert(key, account.clone());
        Ok(account)
    }

    async fn get_balance_for_update(
        &mut self,
        account_id: Uuid,
        asset_id: &str,
    ) -> Result<SignedAmount, StorageError> {
        let key = (account_id, asset_id.to_owned());
        self.ensure_row_lock(&key).await?;
        Ok(self
            .current_balance(&key)
            .await
            .map(|row| row.balance)
            .unwrap_or_else(SignedAmount::zero))
    }

    async fn insert_transaction(
        &mut self,
        transaction: &TransactionRecord,
    ) -> Result<(), StorageError> {
        if self.staged_transaction.is_some() {
            return Err(StorageError::Backend(
                "transaction already staged in this storage transaction".to_owned(),
            ));
        }
        if let Some(external_id) = &transaction.external_id {
            let state = self.inner.state.read().await;
            let key = (transaction.source.clone(), external_id.clone());
            if state.transactions_by_external.contains_key(&key) {
                return Err(StorageError::IdempotencyConflict {
                    tx_source: transaction.source.clone(),
                    external_id: external_id.clone(),
                });
            }
        }
        self.staged_transaction = Some(transaction.clone());
        Ok(())
    }

    async fn insert_entries(&mut self, entries: &[Entry]) -> Result<(), StorageError> {
        self.staged_entries.extend_from_slice(entries);
        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        account_id: Uuid,
        asset_id: &str,
        delta: &BalanceDelta,
    ) -> Result<(), StorageError> {
        let key = (account_id, asset_id.to_owned());
        self.ensure_row_lock(&key).await?;

        let current = self.current_balance(&key).await;
        let (balance, usd_value) = match &current {
            Some(row) => (row.balance, row.usd_value),
            None => (SignedAmount::zero(), SignedAmount::zero()),
        };

        let balance = balance
            .checked_add(delta.debit)?
            .checked_sub(delta.credit)?;
        let usd_value = usd_value
            .checked_add(delta.usd_debit)?
            .checked_sub(delta.usd_credit)?;

        self.staged_balances.insert(
            key,
            AccountBalance {
                account_id,
                asset_id: asset_id.to_owned(),
                balance,
                usd_value,
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        let mut state = self.inner.state.write().await;

        // Final idempotency check: a racing transaction may have committed
        // the same (source, external_id) while this one was building
        if let Some(transaction) = &self.staged_transaction {
            if let Some(external_id) = &transaction.external_id {
                let key = (transaction.source.clone(), external_id.clone());
                if state.transactions_by_external.contains_key(&key) {
                    return Err(StorageError::IdempotencyConflict {
                        tx_source: transaction.source.clone(),
                        external_id: external_id.clone(),
                    });
                }
            }
        }

        for (key, account) in self.staged_accounts {
            state.accounts_by_code.insert(key, account.id);
            state.accounts.insert(account.id, account);
        }

        if let Some(transaction) = self.staged_transaction {
            if let Some(external_id) = &transaction.external_id {
                state.transactions_by_external.insert(
                    (transaction.source.clone(), external_id.clone()),
                    transaction.id,
                );
            }
            state
                .entries_by_transaction
                .insert(transaction.id, self.staged_entries.clone());
            state.transactions.insert(transaction.id, transaction);
        }

        for entry in self.staged_entries {
            state
                .entries_by_account
                .entry((entry.account_id, entry.asset_id.clone()))
                .or_default()
                .push(entry);
        }

        for (key, balance) in self.staged_balances {
            state.balances.insert(key, balance);
        }

        // Row locks release when the guards drop with self
        Ok(())
    }
}
