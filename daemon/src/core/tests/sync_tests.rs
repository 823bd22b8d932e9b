// Sync engine tests: claim protocol, range computation, classification,
// idempotent ingest and failure handling.

use std::{sync::Arc, time::Duration};

use folio_common::{
    amount::SignedAmount,
    chain::{TransferAsset, TransferCategory, TransferEvent},
    time,
    transaction::{TransactionFilter, TransactionStatus},
    wallet::SyncStatus,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    core::{
        ledger::RecordTransactionRequest,
        storage::{TransactionProvider, WalletProvider},
        sync::SyncEngine,
        tests::fixtures::{amt, test_env, FailingChainProvider, ETH_PRICE},
    },
};

fn eth_transfer(from: &str, to: &str, block: u64, value: &str, hash: &str) -> TransferEvent {
    TransferEvent {
        tx_hash: hash.to_owned(),
        log_index: 0,
        block_number: block,
        timestamp: time::now() - chrono::Duration::seconds(30),
        from: from.to_owned(),
        to: to.to_owned(),
        value: amt(value),
        asset: TransferAsset::Native {
            symbol: "ETH".to_owned(),
            decimals: 18,
        },
        category: TransferCategory::Native,
        gas_fee: None,
    }
}

#[tokio::test]
async fn sync_ingests_transfer_and_advances_block() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.chain
        .add_transfer(1, eth_transfer("0xffff", "0xAAA1", 100, "5000000000000000000", "0xabc"));

    env.engine.sync_wallet(wallet.clone()).await.unwrap();

    let refreshed = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(refreshed.sync_status, SyncStatus::Synced);
    assert_eq!(refreshed.last_sync_block, Some(100));
    assert!(refreshed.last_sync_at.is_some());
    assert!(refreshed.sync_error.is_none());

    assert_eq!(
        env.wallet_balance(wallet.id, "ETH").await,
        SignedAmount::positive(amt("5000000000000000000"))
    );

    let recorded = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xabc:0")
        .await
        .unwrap()
        .expect("transfer was recorded");
    assert_eq!(recorded.transaction.transaction_type, "transfer_in");
    assert_eq!(recorded.transaction.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn re_ingesting_the_same_transfer_is_idempotent() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    let transfer = eth_transfer("0xffff", "0xaaa1", 100, "5000000000000000000", "0xabc");
    let occurred_at = transfer.timestamp;
    env.chain.add_transfer(1, transfer);

    env.engine.sync_wallet(wallet.clone()).await.unwrap();
    let first = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xabc:0")
        .await
        .unwrap()
        .unwrap();

    // The same transfer arriving again resolves to the same transaction
    let second = env
        .ledger
        .record_transaction(RecordTransactionRequest {
            transaction_type: "transfer_in".to_owned(),
            source: "sync".to_owned(),
            external_id: Some("1:0xabc:0".to_owned()),
            occurred_at,
            payload: json!({
                "wallet_id": wallet.id,
                "asset_id": "ETH",
                "amount": "5000000000000000000",
            }),
            user_id: None,
        })
        .await
        .unwrap();

    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(
        env.wallet_balance(wallet.id, "ETH").await,
        SignedAmount::positive(amt("5000000000000000000"))
    );
}

#[tokio::test]
async fn internal_transfer_is_recorded_once_across_both_wallets() {
    let env = test_env().await;
    let user_id = Uuid::new_v4();
    let a = env.create_wallet_for_user(user_id, 1, "0xaaa1").await;
    let b = env.create_wallet_for_user(user_id, 1, "0xbbb2").await;
    env.deposit(a.id, "ETH", "2000000000000000000", ETH_PRICE).await;

    env.chain
        .add_transfer(1, eth_transfer("0xaaa1", "0xbbb2", 50, "1000000000000000000", "0xint"));

    env.engine.sync_wallet(a.clone()).await.unwrap();
    env.engine.sync_wallet(b.clone()).await.unwrap();

    let recorded = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xint:0")
        .await
        .unwrap()
        .expect("internal transfer recorded");
    assert_eq!(recorded.transaction.transaction_type, "internal_transfer");

    let mut filter = TransactionFilter::default();
    filter.transaction_type = Some("internal_transfer".to_owned());
    assert_eq!(env.ledger.list_transactions(&filter).await.unwrap().total, 1);

    assert_eq!(
        env.wallet_balance(a.id, "ETH").await,
        SignedAmount::positive(amt("1000000000000000000"))
    );
    assert_eq!(
        env.wallet_balance(b.id, "ETH").await,
        SignedAmount::positive(amt("1000000000000000000"))
    );
}

#[tokio::test]
async fn unpriced_transfer_leaves_envelope_and_cycle_completes() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    let mut transfer = eth_transfer("0xffff", "0xaaa1", 10, "123456", "0xtok");
    transfer.asset = TransferAsset::Erc20 {
        contract_address: "0xdeadbeef".to_owned(),
        symbol: "XYZ".to_owned(),
        decimals: 18,
    };
    transfer.category = TransferCategory::Erc20;
    env.chain.add_transfer(1, transfer);

    env.engine.sync_wallet(wallet.clone()).await.unwrap();

    // The wallet cycle completed despite the per-transfer failure
    let refreshed = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(refreshed.sync_status, SyncStatus::Synced);

    let envelope = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xtok:0")
        .await
        .unwrap()
        .expect("failure envelope recorded");
    assert_eq!(envelope.transaction.status, TransactionStatus::Failed);
    assert!(envelope.entries.is_empty());

    // Nothing was booked
    assert!(env.wallet_balance(wallet.id, "XYZ").await.is_zero());
}

#[tokio::test]
async fn fetch_failure_marks_wallet_error_and_keeps_cursor() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let broken = SyncEngine::new(
        Arc::clone(&env.storage),
        Arc::clone(&env.ledger),
        Arc::clone(&env.assets),
        Arc::new(FailingChainProvider),
        SyncConfig::default(),
    );
    broken.sync_wallet(wallet.clone()).await.unwrap_err();

    let refreshed = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(refreshed.sync_status, SyncStatus::Error);
    assert!(refreshed.sync_error.is_some());
    assert_eq!(refreshed.sync_failures, 1);
    assert_eq!(refreshed.last_sync_block, None);
}

#[tokio::test]
async fn claims_are_exclusive_until_stale() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    let now = time::now();
    let stale = Duration::from_secs(900);

    assert!(env
        .storage
        .claim_wallet_for_sync(wallet.id, now, stale)
        .await
        .unwrap());
    // A live claim blocks other workers
    assert!(!env
        .storage
        .claim_wallet_for_sync(wallet.id, now, stale)
        .await
        .unwrap());
    // Past the stale threshold the claim is recoverable
    let later = now + chrono::Duration::seconds(901);
    assert!(env
        .storage
        .claim_wallet_for_sync(wallet.id, later, stale)
        .await
        .unwrap());
}

#[tokio::test]
async fn incremental_ranges_are_capped_per_cycle() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.chain.set_head(1, 0);

    // First sync establishes the cursor at the (empty) head
    env.engine.sync_wallet(wallet.clone()).await.unwrap();
    let after_first = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(after_first.last_sync_block, Some(0));

    // With a far-ahead head, one cycle advances at most max_blocks_per_cycle
    env.chain.set_head(1, 50_000);
    env.engine.sync_wallet(after_first.clone()).await.unwrap();
    let after_second = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(after_second.last_sync_block, Some(10_000));

    env.engine.sync_wallet(after_second).await.unwrap();
    let after_third = env.storage.get_wallet(wallet.id).await.unwrap().unwrap();
    assert_eq!(after_third.last_sync_block, Some(20_000));
}

#[tokio::test]
async fn due_listing_follows_status_and_backoff() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    let poll = Duration::from_secs(300);
    let stale = Duration::from_secs(900);
    let now = time::now();

    let due = |wallets: &[folio_common::wallet::Wallet], id| {
        wallets.iter().any(|w: &folio_common::wallet::Wallet| w.id == id)
    };

    // Pending wallets are always due
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now, poll, stale)
        .await
        .unwrap();
    assert!(due(&wallets, wallet.id));

    // A live claim takes it out of rotation
    env.storage
        .claim_wallet_for_sync(wallet.id, now, stale)
        .await
        .unwrap();
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now, poll, stale)
        .await
        .unwrap();
    assert!(!due(&wallets, wallet.id));

    // An errored wallet backs off exponentially (1 failure -> 2 intervals)
    env.storage
        .fail_wallet_sync(wallet.id, "boom", now)
        .await
        .unwrap();
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now + chrono::Duration::seconds(599), poll, stale)
        .await
        .unwrap();
    assert!(!due(&wallets, wallet.id));
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now + chrono::Duration::seconds(601), poll, stale)
        .await
        .unwrap();
    assert!(due(&wallets, wallet.id));

    // A synced wallet becomes due again after the poll interval
    env.storage
        .complete_wallet_sync(wallet.id, Some(10), now)
        .await
        .unwrap();
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now + chrono::Duration::seconds(299), poll, stale)
        .await
        .unwrap();
    assert!(!due(&wallets, wallet.id));
    let wallets = env
        .storage
        .list_wallets_due_for_sync(now + chrono::Duration::seconds(301), poll, stale)
        .await
        .unwrap();
    assert!(due(&wallets, wallet.id));
}

#[tokio::test]
async fn run_cycle_processes_due_wallets_concurrently() {
    let env = test_env().await;
    let user_id = Uuid::new_v4();
    let a = env.create_wallet_for_user(user_id, 1, "0xaaa1").await;
    let b = env.create_wallet_for_user(user_id, 1, "0xbbb2").await;
    env.chain
        .add_transfer(1, eth_transfer("0xffff", "0xaaa1", 5, "1000000000000000000", "0xa"));
    env.chain
        .add_transfer(1, eth_transfer("0xffff", "0xbbb2", 6, "2000000000000000000", "0xb"));

    env.engine.run_cycle().await.unwrap();

    for wallet_id in [a.id, b.id] {
        let refreshed = env.storage.get_wallet(wallet_id).await.unwrap().unwrap();
        assert_eq!(refreshed.sync_status, SyncStatus::Synced);
    }
    assert_eq!(
        env.wallet_balance(a.id, "ETH").await,
        SignedAmount::positive(amt("1000000000000000000"))
    );
    assert_eq!(
        env.wallet_balance(b.id, "ETH").await,
        SignedAmount::positive(amt("2000000000000000000"))
    );
}

#[tokio::test]
async fn engine_start_stop_lifecycle() {
    let env = test_env().await;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    env.engine.start(shutdown_rx.clone()).await.unwrap();
    assert!(env.engine.is_running().await);
    // Double start is rejected
    assert!(env.engine.start(shutdown_rx).await.is_err());

    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    env.engine.stop().await.unwrap();
    assert!(!env.engine.is_running().await);
}

#[tokio::test]
async fn transfer_out_with_gas_books_both_legs() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "ETH", "3000000000000000000", ETH_PRICE).await;

    let mut transfer =
        eth_transfer("0xaaa1", "0xffff", 42, "1000000000000000000", "0xout");
    transfer.gas_fee = Some(amt("21000000000000"));
    env.chain.add_transfer(1, transfer);

    env.engine.sync_wallet(wallet.clone()).await.unwrap();

    let recorded = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xout:0")
        .await
        .unwrap()
        .expect("withdrawal recorded");
    assert_eq!(recorded.transaction.transaction_type, "transfer_out");
    assert_eq!(recorded.entries.len(), 4);

    // 3 ETH - 1 ETH - gas
    assert_eq!(
        env.wallet_balance(wallet.id, "ETH").await,
        SignedAmount::positive(amt("1999979000000000000"))
    );
}

#[tokio::test]
async fn zero_value_transfer_is_rejected_into_an_envelope() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.chain
        .add_transfer(1, eth_transfer("0xffff", "0xaaa1", 7, "0", "0xzero"));

    env.engine.sync_wallet(wallet.clone()).await.unwrap();

    let envelope = env
        .storage
        .get_transaction_by_external_id("sync", "1:0xzero:0")
        .await
        .unwrap()
        .expect("zero-value transfer leaves an envelope");
    assert_eq!(envelope.transaction.status, TransactionStatus::Failed);
    assert!(env
        .storage
        .get_wallet(wallet.id)
        .await
        .unwrap()
        .unwrap()
        .last_sync_at
        .is_some());
}

#[tokio::test]
async fn duplicate_wallet_registration_is_rejected() {
    let env = test_env().await;
    let user_id = Uuid::new_v4();
    env.create_wallet_for_user(user_id, 1, "0xAbC1").await;

    // Same address in a different case collides
    let dup = folio_common::wallet::Wallet::new(user_id, "dup", 1, "0xabc1");
    assert!(env.storage.insert_wallet(&dup).await.is_err());

    // Same address on another chain is fine
    let other_chain = folio_common::wallet::Wallet::new(user_id, "other", 137, "0xabc1");
    env.storage.insert_wallet(&other_chain).await.unwrap();
}
