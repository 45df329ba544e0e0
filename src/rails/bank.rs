use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::entity::investment;
use crate::enums::Currency;
use crate::error::Result;
use crate::rails::paymee::{ map_gateway_status, PaymeeClient };
use crate::rails::{ PaymentProof, PaymentRail, RailCheck, RailSession };

/// Bank transfers through the external gateway. The session reference
/// doubles as the wire reference the investor puts on their transfer; the
/// gateway reports the payment once the funds are matched.
pub struct BankTransferRail {
    gateway: Arc<PaymeeClient>,
}

impl BankTransferRail {
    pub fn new(gateway: Arc<PaymeeClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PaymentRail for BankTransferRail {
    async fn initiate(&self, investment: &investment::Model) -> Result<RailSession> {
        let session = self.gateway.create_session(
            investment.amount,
            &investment.currency,
            "bank_transfer",
            &investment.id.to_string()
        ).await?;

        Ok(RailSession {
            reference: session.reference,
            payment_url: None,
        })
    }

    async fn verify(&self, session_ref: &str) -> Result<RailCheck> {
        let payment = self.gateway.payment_status(session_ref).await?;
        let currency = Currency::from_str(&payment.currency)?;

        Ok(RailCheck {
            outcome: map_gateway_status(&payment.status),
            proof: Some(PaymentProof {
                gateway_ref: Some(payment.reference),
                amount: payment.amount,
                currency,
            }),
        })
    }
}
