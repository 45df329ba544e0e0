use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::entity::investment;
use crate::db::LedgerStore;
use crate::enums::Currency;
use crate::error::{ AppError, Result };
use crate::rails::{ PaymentProof, PaymentRail, RailCheck, RailOutcome, RailSession };

/// Internal wallet rail. `initiate` is the atomic debit-and-confirm: the
/// balance check, ledger entry, and status transition happen inside one
/// store transaction, so a crash can never debit without linking the
/// investment or vice versa.
pub struct WalletRail {
    ledger: Arc<dyn LedgerStore>,
}

impl WalletRail {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PaymentRail for WalletRail {
    async fn initiate(&self, investment: &investment::Model) -> Result<RailSession> {
        let outcome = self.ledger
            .confirm_with_wallet_debit(investment.id, investment.version).await?;

        let row = outcome.into_row();
        match row.transaction_id {
            Some(transaction_id) => {
                Ok(RailSession {
                    reference: transaction_id.to_string(),
                    payment_url: None,
                })
            }
            // Lost the race against a writer that moved the row elsewhere
            // (cancelled, failed). Nothing was debited.
            None => {
                Err(
                    AppError::InvalidState(
                        format!("Investment {} is {}, wallet debit not applied", row.id, row.status)
                    )
                )
            }
        }
    }

    async fn verify(&self, session_ref: &str) -> Result<RailCheck> {
        let transaction_id = Uuid::from_str(session_ref).map_err(|_| {
            AppError::validation("Wallet session reference is not a transaction id", "session_ref")
        })?;

        match self.ledger.wallet_transaction(transaction_id).await? {
            Some(entry) => {
                let currency = Currency::from_str(&entry.currency)?;
                Ok(RailCheck {
                    outcome: RailOutcome::Succeeded,
                    proof: Some(PaymentProof {
                        gateway_ref: None,
                        amount: entry.amount,
                        currency,
                    }),
                })
            }
            None => Ok(RailCheck { outcome: RailOutcome::Pending, proof: None }),
        }
    }
}
