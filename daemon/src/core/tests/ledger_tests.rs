// Ledger engine integration tests: the commit protocol, the balance
// invariant, idempotency and the five handlers.

use std::collections::HashMap;

use folio_common::{
    account::AccountCode,
    amount::{Amount, SignedAmount},
    time,
    transaction::{
        DebitCredit, EntryKind, TransactionFilter, TransactionStatus, TransactionWithEntries,
    },
};
use serde_json::json;
use uuid::Uuid;

use crate::core::{
    error::{ErrorKind, LedgerError},
    ledger::RecordTransactionRequest,
    tests::fixtures::{amt, manual_request, test_env, BTC_PRICE, ETH_PRICE, USDC_PRICE},
};

// Per-asset debits must equal credits in every committed transaction
fn assert_balanced(item: &TransactionWithEntries) {
    let mut sums: HashMap<&str, (Amount, Amount)> = HashMap::new();
    for entry in &item.entries {
        let (debits, credits) = sums
            .entry(entry.asset_id.as_str())
            .or_insert_with(|| (Amount::zero(), Amount::zero()));
        match entry.debit_credit {
            DebitCredit::Debit => *debits = debits.checked_add(entry.amount).unwrap(),
            DebitCredit::Credit => *credits = credits.checked_add(entry.amount).unwrap(),
        }
    }
    for (asset, (debits, credits)) in sums {
        assert_eq!(debits, credits, "asset {} is unbalanced", asset);
    }
}

#[tokio::test]
async fn deposit_one_btc_at_fifty_thousand() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "transfer_in",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "100000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.transaction.status, TransactionStatus::Completed);
    assert_eq!(recorded.entries.len(), 2);
    assert_balanced(&recorded);

    // Debits first in the read ordering
    let debit = &recorded.entries[0];
    let credit = &recorded.entries[1];
    assert_eq!(debit.debit_credit, DebitCredit::Debit);
    assert_eq!(debit.entry_type, EntryKind::AssetIncrease);
    assert_eq!(debit.amount, amt("100000000"));
    assert_eq!(debit.usd_value, amt("5000000000000"));
    assert_eq!(credit.debit_credit, DebitCredit::Credit);
    assert_eq!(credit.entry_type, EntryKind::Income);
    assert_eq!(credit.usd_value, amt("5000000000000"));

    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("100000000"))
    );

    // The income counter-account runs negative under debits-minus-credits
    let income = env
        .ledger
        .get_account_by_code(&AccountCode::income("BTC"))
        .await
        .unwrap();
    let income_balance = env
        .ledger
        .get_account_balance(income.id, "BTC")
        .await
        .unwrap();
    assert!(income_balance.balance.is_negative());
    assert_eq!(income_balance.balance.magnitude(), amt("100000000"));
}

#[tokio::test]
async fn deposit_without_override_uses_oracle_price() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    // The oracle reaches the provider on a cold start
    let quote = env.oracle.current_price(&env.btc).await.unwrap();
    assert!(!quote.is_stale());
    assert_eq!(quote.price, amt(BTC_PRICE));

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "transfer_in",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "200000000",
            }),
        ))
        .await
        .unwrap();

    // 2 BTC at the oracle's $50,000: rate sticks to the entries
    assert_eq!(recorded.entries[0].usd_rate, amt(BTC_PRICE));
    assert_eq!(recorded.entries[0].usd_value, amt("10000000000000"));
}

#[tokio::test]
async fn withdrawal_with_gas_balances_both_assets() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100000000", BTC_PRICE).await;
    env.deposit(wallet.id, "ETH", "10000000000000000", ETH_PRICE)
        .await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "transfer_out",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "50000000",
                "usd_rate": BTC_PRICE,
                "gas": { "chain_id": 1, "amount": "21000000000" },
            }),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.entries.len(), 4);
    assert_balanced(&recorded);
    assert_eq!(recorded.entries[0].debit_credit, DebitCredit::Debit);

    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("50000000"))
    );
    assert_eq!(
        env.wallet_balance(wallet.id, "ETH").await,
        SignedAmount::positive(amt("9999999979000000"))
    );

    // Expense and gas accounts hold the outflows
    let expense = env
        .ledger
        .get_account_by_code(&AccountCode::expense("BTC"))
        .await
        .unwrap();
    assert_eq!(
        env.ledger
            .get_account_balance(expense.id, "BTC")
            .await
            .unwrap()
            .balance,
        SignedAmount::positive(amt("50000000"))
    );
    let gas = env
        .ledger
        .get_account_by_code(&AccountCode::gas(1))
        .await
        .unwrap();
    assert_eq!(
        env.ledger
            .get_account_balance(gas.id, "ETH")
            .await
            .unwrap()
            .balance,
        SignedAmount::positive(amt("21000000000"))
    );
}

#[tokio::test]
async fn internal_transfer_moves_between_wallets() {
    let env = test_env().await;
    let user_id = Uuid::new_v4();
    let w1 = env.create_wallet_for_user(user_id, 1, "0xaaa1").await;
    let w2 = env.create_wallet_for_user(user_id, 1, "0xbbb2").await;
    env.deposit(w1.id, "BTC", "100000000", BTC_PRICE).await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "internal_transfer",
            json!({
                "wallet_id": w1.id,
                "dst_wallet_id": w2.id,
                "asset_id": "BTC",
                "amount": "30000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.entries.len(), 2);
    assert_balanced(&recorded);

    let b1 = env.wallet_balance(w1.id, "BTC").await;
    let b2 = env.wallet_balance(w2.id, "BTC").await;
    assert_eq!(b1, SignedAmount::positive(amt("70000000")));
    assert_eq!(b2, SignedAmount::positive(amt("30000000")));
    // The user's total holdings are unchanged
    assert_eq!(
        b1.checked_add(b2.magnitude()).unwrap().magnitude(),
        amt("100000000")
    );
}

#[tokio::test]
async fn cross_user_internal_transfer_is_rejected() {
    let env = test_env().await;
    let w1 = env.create_wallet(1, "0xaaa1").await;
    let w2 = env.create_wallet(1, "0xbbb2").await;
    env.deposit(w1.id, "BTC", "100000000", BTC_PRICE).await;

    let err = env
        .ledger
        .record_transaction(manual_request(
            "internal_transfer",
            json!({
                "wallet_id": w1.id,
                "dst_wallet_id": w2.id,
                "asset_id": "BTC",
                "amount": "30000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CrossUserWallet));
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[tokio::test]
async fn adjustment_tops_up_to_target() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "40000000", BTC_PRICE).await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "asset_adjustment",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "new_balance": "100000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.entries.len(), 2);
    assert_balanced(&recorded);
    let debit = &recorded.entries[0];
    assert_eq!(debit.debit_credit, DebitCredit::Debit);
    assert_eq!(debit.entry_type, EntryKind::AssetIncrease);
    assert_eq!(debit.amount, amt("60000000"));
    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("100000000"))
    );
}

#[tokio::test]
async fn adjustment_down_produces_withdrawal_pair() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100000000", BTC_PRICE).await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "asset_adjustment",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "new_balance": "25000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap();

    assert_balanced(&recorded);
    let debit = &recorded.entries[0];
    assert_eq!(debit.entry_type, EntryKind::Expense);
    assert_eq!(debit.amount, amt("75000000"));
    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("25000000"))
    );
}

#[tokio::test]
async fn noop_adjustment_is_rejected_and_commits_nothing() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100000000", BTC_PRICE).await;

    let before = env
        .ledger
        .list_transactions(&TransactionFilter::default())
        .await
        .unwrap()
        .total;

    let err = env
        .ledger
        .record_transaction(manual_request(
            "asset_adjustment",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "new_balance": "100000000",
            }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoOpAdjustment));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let after = env
        .ledger
        .list_transactions(&TransactionFilter::default())
        .await
        .unwrap()
        .total;
    assert_eq!(before, after);
    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("100000000"))
    );
}

#[tokio::test]
async fn swap_routes_through_per_transaction_clearing() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "ETH", "1000000000000000000", ETH_PRICE)
        .await;

    let recorded = env
        .ledger
        .record_transaction(manual_request(
            "swap",
            json!({
                "wallet_id": wallet.id,
                "out_asset_id": "ETH",
                "out_amount": "500000000000000000",
                "in_asset_id": "USDC",
                "in_amount": "1000000000",
                "out_usd_rate": ETH_PRICE,
                "in_usd_rate": USDC_PRICE,
                "protocol": "uniswap",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(recorded.entries.len(), 4);
    assert_balanced(&recorded);

    assert_eq!(
        env.wallet_balance(wallet.id, "ETH").await,
        SignedAmount::positive(amt("500000000000000000"))
    );
    assert_eq!(
        env.wallet_balance(wallet.id, "USDC").await,
        SignedAmount::positive(amt("1000000000"))
    );

    // The clearing account is scoped to this transaction and absorbs one
    // signed leg per asset
    let clearing = env
        .ledger
        .get_account_by_code(&AccountCode::clearing_for(recorded.transaction.id))
        .await
        .unwrap();
    let eth_leg = env
        .ledger
        .get_account_balance(clearing.id, "ETH")
        .await
        .unwrap();
    assert_eq!(
        eth_leg.balance,
        SignedAmount::positive(amt("500000000000000000"))
    );
    let usdc_leg = env
        .ledger
        .get_account_balance(clearing.id, "USDC")
        .await
        .unwrap();
    assert!(usdc_leg.balance.is_negative());
    assert_eq!(usdc_leg.balance.magnitude(), amt("1000000000"));

    // And the projection agrees with the entry log
    for asset in ["ETH", "USDC"] {
        let reconciliation = env
            .ledger
            .reconcile_balance(clearing.id, asset)
            .await
            .unwrap();
        assert!(reconciliation.is_balanced());
    }
}

#[tokio::test]
async fn idempotent_resubmission_returns_existing_transaction() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let mut request = manual_request(
        "transfer_in",
        json!({
            "wallet_id": wallet.id,
            "asset_id": "BTC",
            "amount": "100000000",
            "usd_rate": BTC_PRICE,
        }),
    );
    request.source = "sync".to_owned();
    request.external_id = Some("1:0xabc:0".to_owned());

    let first = env.ledger.record_transaction(request.clone()).await.unwrap();
    let second = env.ledger.record_transaction(request).await.unwrap();

    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(second.entries.len(), 2);
    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("100000000"))
    );
}

#[tokio::test]
async fn future_occurred_at_is_rejected() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let mut request = manual_request(
        "transfer_in",
        json!({
            "wallet_id": wallet.id,
            "asset_id": "BTC",
            "amount": "100000000",
            "usd_rate": BTC_PRICE,
        }),
    );
    request.occurred_at = time::now() + chrono::Duration::seconds(1);

    let err = env.ledger.record_transaction(request).await.unwrap_err();
    assert!(matches!(err, LedgerError::OccurredInFuture(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn zero_amount_is_rejected() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let err = env
        .ledger
        .record_transaction(manual_request(
            "transfer_in",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "0",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ZeroAmount));
}

#[tokio::test]
async fn unknown_transaction_type_is_rejected() {
    let env = test_env().await;
    let err = env
        .ledger
        .record_transaction(manual_request("margin_trade", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownTransactionType(_)));
}

#[tokio::test]
async fn insufficient_balance_commits_nothing() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100", "0").await;

    let err = env
        .ledger
        .record_transaction(manual_request(
            "transfer_out",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "150",
                "usd_rate": "0",
            }),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

    assert_eq!(
        env.wallet_balance(wallet.id, "BTC").await,
        SignedAmount::positive(amt("100"))
    );
    let page = env
        .ledger
        .list_transactions(&TransactionFilter::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    // No expense account side effects either
    assert!(env
        .ledger
        .get_account_by_code(&AccountCode::expense("BTC"))
        .await
        .is_err());
}

#[tokio::test]
async fn reconcile_agrees_with_projection_everywhere() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100000000", BTC_PRICE).await;
    env.deposit(wallet.id, "ETH", "10000000000000000", ETH_PRICE)
        .await;
    env.ledger
        .record_transaction(manual_request(
            "transfer_out",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "25000000",
                "usd_rate": BTC_PRICE,
                "gas": { "chain_id": 1, "amount": "21000000000" },
            }),
        ))
        .await
        .unwrap();

    for (code, asset) in [
        (AccountCode::wallet(wallet.id, "BTC"), "BTC"),
        (AccountCode::wallet(wallet.id, "ETH"), "ETH"),
        (AccountCode::income("BTC"), "BTC"),
        (AccountCode::income("ETH"), "ETH"),
        (AccountCode::expense("BTC"), "BTC"),
        (AccountCode::gas(1), "ETH"),
    ] {
        let account = env.ledger.get_account_by_code(&code).await.unwrap();
        let reconciliation = env
            .ledger
            .reconcile_balance(account.id, asset)
            .await
            .unwrap();
        assert!(
            reconciliation.is_balanced(),
            "account {} asset {} drifted: {:?}",
            code,
            asset,
            reconciliation.discrepancy()
        );
    }
}

#[tokio::test]
async fn boundary_amounts_are_storable() {
    let env = test_env().await;

    // Smallest units
    let dust = env.create_wallet(1, "0xaaa1").await;
    env.deposit(dust.id, "BTC", "1", "0").await;
    env.deposit(dust.id, "ETH", "1", "0").await;
    assert_eq!(
        env.wallet_balance(dust.id, "BTC").await,
        SignedAmount::positive(amt("1"))
    );

    // 10^77
    let big = env.create_wallet(1, "0xbbb2").await;
    let ten_pow_77 = format!("1{}", "0".repeat(77));
    env.deposit(big.id, "BTC", &ten_pow_77, "0").await;
    assert_eq!(
        env.wallet_balance(big.id, "BTC").await,
        SignedAmount::positive(amt(&ten_pow_77))
    );

    // 10^78 - 1, the column maximum, at rate zero
    let max = env.create_wallet(1, "0xccc3").await;
    let max_units = "9".repeat(78);
    env.deposit(max.id, "ETH", &max_units, "0").await;
    assert_eq!(
        env.wallet_balance(max.id, "ETH").await,
        SignedAmount::positive(amt(&max_units))
    );
}

#[tokio::test]
async fn sync_source_failures_leave_envelopes() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    // Unknown asset from sync: rejected, but the envelope is recorded
    let request = RecordTransactionRequest {
        transaction_type: "transfer_in".to_owned(),
        source: "sync".to_owned(),
        external_id: Some("1:0xdead:0".to_owned()),
        occurred_at: time::now() - chrono::Duration::seconds(1),
        payload: json!({
            "wallet_id": wallet.id,
            "asset_id": "NOPE",
            "amount": "5",
        }),
        user_id: None,
    };
    let err = env.ledger.record_transaction(request).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAsset(_)));

    let mut filter = TransactionFilter::default();
    filter.status = Some(TransactionStatus::Failed);
    let failed = env.ledger.list_transactions(&filter).await.unwrap();
    assert_eq!(failed.total, 1);
    let envelope = &failed.transactions[0];
    assert_eq!(
        envelope.transaction.external_id.as_deref(),
        Some("1:0xdead:0")
    );
    assert!(envelope.entries.is_empty());
    assert!(envelope.transaction.error_message.is_some());

    // The same failure from a manual caller leaves no envelope
    let manual = manual_request(
        "transfer_in",
        json!({
            "wallet_id": wallet.id,
            "asset_id": "NOPE",
            "amount": "5",
        }),
    );
    env.ledger.record_transaction(manual).await.unwrap_err();
    let failed = env.ledger.list_transactions(&filter).await.unwrap();
    assert_eq!(failed.total, 1);
}

#[tokio::test]
async fn foreign_wallet_reads_as_not_found() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;

    let mut request = manual_request(
        "transfer_in",
        json!({
            "wallet_id": wallet.id,
            "asset_id": "BTC",
            "amount": "100000000",
            "usd_rate": BTC_PRICE,
        }),
    );
    // A different principal must not learn the wallet exists
    request.user_id = Some(Uuid::new_v4());

    let err = env.ledger.record_transaction(request).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn list_transactions_filters_and_counts() {
    let env = test_env().await;
    let wallet = env.create_wallet(1, "0xaaa1").await;
    env.deposit(wallet.id, "BTC", "100000000", BTC_PRICE).await;
    env.deposit(wallet.id, "ETH", "1000000000000000000", ETH_PRICE)
        .await;
    env.ledger
        .record_transaction(manual_request(
            "transfer_out",
            json!({
                "wallet_id": wallet.id,
                "asset_id": "BTC",
                "amount": "10000000",
                "usd_rate": BTC_PRICE,
            }),
        ))
        .await
        .unwrap();

    let mut filter = TransactionFilter::default();
    filter.transaction_type = Some("transfer_in".to_owned());
    let page = env.ledger.list_transactions(&filter).await.unwrap();
    assert_eq!(page.total, 2);

    let mut filter = TransactionFilter::default();
    filter.asset_id = Some("BTC".to_owned());
    let page = env.ledger.list_transactions(&filter).await.unwrap();
    assert_eq!(page.total, 2);

    // Exact total survives pagination
    let mut filter = TransactionFilter::default();
    filter.limit = Some(1);
    let page = env.ledger.list_transactions(&filter).await.unwrap();
    assert_eq!(page.transactions.len(), 1);
    assert_eq!(page.total, 3);
}
