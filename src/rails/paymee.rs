use std::time::Duration;

use sea_orm::prelude::Decimal;
use serde::{ Deserialize, Serialize };

use crate::error::{ AppError, Result };
use crate::rails::RailOutcome;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Thin HTTP client for the Paymee-style payment gateway. Owns transport
/// retries; callers only ever see normalized results or `Transient`.
pub struct PaymeeClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    amount: Decimal,
    currency: &'a str,
    channel: &'a str,
    order_ref: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct GatewaySession {
    pub reference: String,
    pub payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayPayment {
    pub reference: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
}

impl PaymeeClient {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client
            ::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Open a payment session for one investment on the given channel
    /// ("card" or "bank_transfer").
    pub async fn create_session(
        &self,
        amount: Decimal,
        currency: &str,
        channel: &str,
        order_ref: &str
    ) -> Result<GatewaySession> {
        let url = format!("{}/v2/payments", self.base_url);
        let body = CreateSessionBody { amount, currency, channel, order_ref };

        self.post_with_retry(&url, &body).await
    }

    /// Query the gateway for the authoritative state of a session.
    pub async fn payment_status(&self, reference: &str) -> Result<GatewayPayment> {
        let url = format!("{}/v2/payments/{}", self.base_url, reference);
        self.get_with_retry(&url).await
    }

    async fn post_with_retry<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B
    ) -> Result<T> {
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(
                    Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt))
                ).await;
            }

            let response = self.client
                .post(url)
                .header("Authorization", format!("Token {}", self.api_token))
                .json(body)
                .send().await;

            match response {
                Ok(resp) => {
                    return self.handle_response(resp).await;
                }
                Err(e) => {
                    tracing::warn!(attempt, "Gateway request failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_else(|| "no response".to_string());
        Err(AppError::Transient(format!("Gateway unreachable: {}", detail)))
    }

    async fn get_with_retry<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(
                    Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt))
                ).await;
            }

            let response = self.client
                .get(url)
                .header("Authorization", format!("Token {}", self.api_token))
                .send().await;

            match response {
                Ok(resp) => {
                    return self.handle_response(resp).await;
                }
                Err(e) => {
                    tracing::warn!(attempt, "Gateway request failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        let detail = last_err.map(|e| e.to_string()).unwrap_or_else(|| "no response".to_string());
        Err(AppError::Transient(format!("Gateway unreachable: {}", detail)))
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        resp: reqwest::Response
    ) -> Result<T> {
        let status = resp.status();

        if status.is_server_error() {
            return Err(AppError::Transient(format!("Gateway returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!("Gateway rejected request ({}): {}", status, body)));
        }

        resp
            .json::<T>().await
            .map_err(|e| AppError::Internal(format!("Malformed gateway response: {}", e)))
    }
}

/// Map gateway payment states onto the normalized rail outcome.
pub fn map_gateway_status(status: &str) -> RailOutcome {
    match status {
        "paid" | "completed" => RailOutcome::Succeeded,
        "failed" | "cancelled" | "expired" => RailOutcome::Failed,
        _ => RailOutcome::Pending,
    }
}
