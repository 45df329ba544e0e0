pub mod investment;
pub mod wallet_account;
pub mod wallet_transaction;
pub mod chain_settlement;

pub use investment::Entity as Investment;
pub use wallet_account::Entity as WalletAccount;
pub use wallet_transaction::Entity as WalletTransaction;
pub use chain_settlement::Entity as ChainSettlement;
