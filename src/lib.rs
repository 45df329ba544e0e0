pub mod config;
pub mod enums;
pub mod error;
pub mod db;
pub mod rails;
pub mod chain;
pub mod projects;
pub mod services;
pub mod api;

#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use enums::{ Currency, InvestmentStatus, PaymentMethod, SettlementStatus, WalletDirection, WalletEntryKind };
pub use error::{ AppError, Result };
