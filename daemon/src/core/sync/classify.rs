// Transfer classification.
//
// Given a wallet and a transfer fetched for its address, decide which
// transaction type to record and build the handler payload. Both sides of
// an internal transfer classify to the same payload; the shared external id
// deduplicates them at the ledger.

use std::collections::HashMap;

use folio_common::{chain::TransferEvent, wallet::Wallet};
use serde_json::json;

#[derive(Debug)]
pub enum Classified {
    /// Record through the ledger with the given handler key and payload.
    Record {
        transaction_type: &'static str,
        payload: serde_json::Value,
    },
    /// Drop silently (not an error, nothing to book).
    Skip(&'static str),
    /// Could not be classified; a FAILED envelope is recorded.
    Unknown(String),
}

/// `user_wallets` maps lowercase addresses to the user's wallets on this
/// chain, including the synced wallet itself.
pub fn classify_transfer(
    wallet: &Wallet,
    transfer: &TransferEvent,
    user_wallets: &HashMap<String, Wallet>,
) -> Classified {
    let own = wallet.address_key();
    let from = transfer.from.to_lowercase();
    let to = transfer.to.to_lowercase();
    let symbol = transfer.asset.symbol().to_uppercase();

    if from == own && to == own {
        // The transfer port does not emit these; drop defensively
        return Classified::Skip("self-transfer");
    }

    if to == own {
        if let Some(src) = user_wallets.get(&from).filter(|src| src.id != wallet.id) {
            return internal_transfer(src, wallet, &symbol, transfer);
        }
        return Classified::Record {
            transaction_type: "transfer_in",
            payload: json!({
                "wallet_id": wallet.id,
                "asset_id": symbol,
                "amount": transfer.value,
            }),
        };
    }

    if from == own {
        if let Some(dst) = user_wallets.get(&to).filter(|dst| dst.id != wallet.id) {
            return internal_transfer(wallet, dst, &symbol, transfer);
        }
        let mut payload = json!({
            "wallet_id": wallet.id,
            "asset_id": symbol,
            "amount": transfer.value,
        });
        if let Some(gas_fee) = transfer.gas_fee {
            payload["gas"] = json!({
                "chain_id": wallet.chain_id,
                "amount": gas_fee,
            });
        }
        return Classified::Record {
            transaction_type: "transfer_out",
            payload,
        };
    }

    Classified::Unknown(format!(
        "transfer {}:{} involves neither side of wallet address {}",
        transfer.tx_hash, transfer.log_index, wallet.address
    ))
}

fn internal_transfer(
    src: &Wallet,
    dst: &Wallet,
    symbol: &str,
    transfer: &TransferEvent,
) -> Classified {
    let mut payload = json!({
        "wallet_id": src.id,
        "dst_wallet_id": dst.id,
        "asset_id": symbol,
        "amount": transfer.value,
    });
    if let Some(gas_fee) = transfer.gas_fee {
        payload["gas"] = json!({
            "chain_id": src.chain_id,
            "amount": gas_fee,
        });
    }
    Classified::Record {
        transaction_type: "internal_transfer",
        payload,
    }
}
