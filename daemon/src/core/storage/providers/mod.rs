mod account;
mod asset;
mod balance;
mod price;
mod transaction;
mod wallet;

pub use self::{
    account::AccountProvider,
    asset::AssetProvider,
    balance::BalanceProvider,
    price::PriceHistoryProvider,
    transaction::TransactionProvider,
    wallet::WalletProvider,
};
