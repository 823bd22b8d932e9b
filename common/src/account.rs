// Ledger accounts and their canonical codes.
//
// The code is the persisted identity of an account. Its grammar is fixed:
//   wallet.{wallet_id}.{asset_id}
//   income.{asset_id}
//   expense.{asset_id}
//   gas_fee.{chain_id}
//   clearing.{scope}

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

use crate::chain::ChainId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountCodeError {
    #[error("invalid account code '{0}'")]
    Invalid(String),
    #[error("invalid wallet id in account code: {0}")]
    InvalidWalletId(#[from] uuid::Error),
    #[error("invalid chain id in account code '{0}'")]
    InvalidChainId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    CryptoWallet,
    Income,
    Expense,
    GasFee,
    Clearing,
}

impl AccountType {
    // Only wallet balances are user funds and must never go negative.
    // Everything else carries the raw debits-minus-credits sum, which is
    // negative for income accounts and transiently signed for clearing.
    pub fn requires_non_negative_balance(&self) -> bool {
        matches!(self, AccountType::CryptoWallet)
    }
}

/// Canonical, unique account identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountCode {
    Wallet { wallet_id: Uuid, asset_id: String },
    Income { asset_id: String },
    Expense { asset_id: String },
    Gas { chain_id: ChainId },
    Clearing { scope: String },
}

impl AccountCode {
    pub fn wallet(wallet_id: Uuid, asset_id: impl Into<String>) -> Self {
        Self::Wallet {
            wallet_id,
            asset_id: asset_id.into(),
        }
    }

    pub fn income(asset_id: impl Into<String>) -> Self {
        Self::Income {
            asset_id: asset_id.into(),
        }
    }

    pub fn expense(asset_id: impl Into<String>) -> Self {
        Self::Expense {
            asset_id: asset_id.into(),
        }
    }

    pub fn gas(chain_id: ChainId) -> Self {
        Self::Gas { chain_id }
    }

    // Per-transaction clearing account, scoped by the transaction id
    pub fn clearing_for(transaction_id: Uuid) -> Self {
        Self::Clearing {
            scope: transaction_id.to_string(),
        }
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            AccountCode::Wallet { .. } => AccountType::CryptoWallet,
            AccountCode::Income { .. } => AccountType::Income,
            AccountCode::Expense { .. } => AccountType::Expense,
            AccountCode::Gas { .. } => AccountType::GasFee,
            AccountCode::Clearing { .. } => AccountType::Clearing,
        }
    }

    pub fn asset_id(&self) -> Option<&str> {
        match self {
            AccountCode::Wallet { asset_id, .. }
            | AccountCode::Income { asset_id }
            | AccountCode::Expense { asset_id } => Some(asset_id),
            _ => None,
        }
    }

    pub fn wallet_id(&self) -> Option<Uuid> {
        match self {
            AccountCode::Wallet { wallet_id, .. } => Some(*wallet_id),
            _ => None,
        }
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            AccountCode::Gas { chain_id } => Some(*chain_id),
            _ => None,
        }
    }
}

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountCode::Wallet {
                wallet_id,
                asset_id,
            } => write!(f, "wallet.{}.{}", wallet_id, asset_id),
            AccountCode::Income { asset_id } => write!(f, "income.{}", asset_id),
            AccountCode::Expense { asset_id } => write!(f, "expense.{}", asset_id),
            AccountCode::Gas { chain_id } => write!(f, "gas_fee.{}", chain_id),
            AccountCode::Clearing { scope } => write!(f, "clearing.{}", scope),
        }
    }
}

impl FromStr for AccountCode {
    type Err = AccountCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s
            .split_once('.')
            .ok_or_else(|| AccountCodeError::Invalid(s.to_owned()))?;
        match prefix {
            "wallet" => {
                let (wallet_id, asset_id) = rest
                    .split_once('.')
                    .ok_or_else(|| AccountCodeError::Invalid(s.to_owned()))?;
                if asset_id.is_empty() {
                    return Err(AccountCodeError::Invalid(s.to_owned()));
                }
                Ok(AccountCode::Wallet {
                    wallet_id: Uuid::parse_str(wallet_id)?,
                    asset_id: asset_id.to_owned(),
                })
            }
            "income" | "expense" if !rest.is_empty() && !rest.contains('.') => {
                if prefix == "income" {
                    Ok(AccountCode::income(rest))
                } else {
                    Ok(AccountCode::expense(rest))
                }
            }
            "gas_fee" => {
                let chain_id = rest
                    .parse::<ChainId>()
                    .map_err(|_| AccountCodeError::InvalidChainId(s.to_owned()))?;
                Ok(AccountCode::Gas { chain_id })
            }
            "clearing" if !rest.is_empty() => Ok(AccountCode::Clearing {
                scope: rest.to_owned(),
            }),
            _ => Err(AccountCodeError::Invalid(s.to_owned())),
        }
    }
}

impl Serialize for AccountCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// A ledger account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub code: AccountCode,
    pub account_type: AccountType,
    // Uppercase symbol; absent for gas and clearing accounts
    pub asset_id: Option<String>,
    // Set iff account_type is CRYPTO_WALLET
    pub wallet_id: Option<Uuid>,
    pub chain_id: Option<ChainId>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Account {
    // Build the row a code implies; ids are assigned here, uniqueness is the
    // storage layer's concern via the code column
    pub fn from_code(code: AccountCode, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_type: code.account_type(),
            asset_id: code.asset_id().map(str::to_owned),
            wallet_id: code.wallet_id(),
            chain_id: code.chain_id(),
            metadata: serde_json::Value::Null,
            created_at,
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        let wallet_id = Uuid::new_v4();
        let codes = [
            AccountCode::wallet(wallet_id, "BTC"),
            AccountCode::income("ETH"),
            AccountCode::expense("USDC"),
            AccountCode::gas(1),
            AccountCode::clearing_for(Uuid::new_v4()),
        ];
        for code in codes {
            let parsed: AccountCode = code.to_string().parse().unwrap();
            assert_eq!(parsed, code);
        }
    }

    #[test]
    fn code_rejects_malformed() {
        for bad in [
            "wallet",
            "wallet.not-a-uuid.BTC",
            "income.",
            "gas_fee.one",
            "vault.BTC",
            "clearing.",
        ] {
            assert!(bad.parse::<AccountCode>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn only_wallets_require_non_negative_balance() {
        assert!(AccountType::CryptoWallet.requires_non_negative_balance());
        assert!(!AccountType::Income.requires_non_negative_balance());
        assert!(!AccountType::Clearing.requires_non_negative_balance());
    }

    #[test]
    fn account_from_code_derives_columns() {
        let wallet_id = Uuid::new_v4();
        let account =
            Account::from_code(AccountCode::wallet(wallet_id, "BTC"), Utc::now());
        assert_eq!(account.account_type, AccountType::CryptoWallet);
        assert_eq!(account.asset_id.as_deref(), Some("BTC"));
        assert_eq!(account.wallet_id, Some(wallet_id));

        let gas = Account::from_code(AccountCode::gas(137), Utc::now());
        assert_eq!(gas.account_type, AccountType::GasFee);
        assert_eq!(gas.chain_id, Some(137));
        assert!(gas.asset_id.is_none());
    }
}
