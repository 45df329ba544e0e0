use async_trait::async_trait;
use sea_orm::prelude::Decimal;

use crate::db::entity::investment;
use crate::enums::Currency;
use crate::error::Result;

mod paymee;
pub use paymee::PaymeeClient;

mod wallet;
pub use wallet::WalletRail;

mod card;
pub use card::CardRail;

mod bank;
pub use bank::BankTransferRail;

/// Session created by a rail's `initiate`. The reference is what later
/// callbacks and verification calls are keyed on.
#[derive(Debug, Clone)]
pub struct RailSession {
    pub reference: String,
    pub payment_url: Option<String>,
}

/// Normalized payment outcome. Gateway-specific states never leave the
/// rail modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailOutcome {
    Succeeded,
    Pending,
    Failed,
}

/// Evidence that money actually moved, checked against the stored row
/// before any confirmation applies.
#[derive(Debug, Clone)]
pub struct PaymentProof {
    pub gateway_ref: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone)]
pub struct RailCheck {
    pub outcome: RailOutcome,
    pub proof: Option<PaymentProof>,
}

/// Uniform surface over the payment channels.
///
/// `initiate` may have rail-specific side effects: the wallet rail debits
/// synchronously and atomically with the investment confirmation, the
/// gateway rails only open a session. Each rail owns its retry policy for
/// external calls and reports unreachable collaborators as `Transient`.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn initiate(&self, investment: &investment::Model) -> Result<RailSession>;

    async fn verify(&self, session_ref: &str) -> Result<RailCheck>;
}
