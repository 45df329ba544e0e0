use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::entity::investment;
use crate::enums::Currency;
use crate::error::Result;
use crate::rails::paymee::{ map_gateway_status, PaymeeClient };
use crate::rails::{ PaymentProof, PaymentRail, RailCheck, RailSession };

/// Card payments through the external gateway. `initiate` opens a checkout
/// session and yields the URL the investor completes payment at.
pub struct CardRail {
    gateway: Arc<PaymeeClient>,
}

impl CardRail {
    pub fn new(gateway: Arc<PaymeeClient>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PaymentRail for CardRail {
    async fn initiate(&self, investment: &investment::Model) -> Result<RailSession> {
        let session = self.gateway.create_session(
            investment.amount,
            &investment.currency,
            "card",
            &investment.id.to_string()
        ).await?;

        Ok(RailSession {
            reference: session.reference,
            payment_url: session.payment_url,
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
