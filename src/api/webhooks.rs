use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use hmac::{ Hmac, Mac };
use sea_orm::prelude::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::enums::Currency;
use crate::error::{ AppError, Result };
use crate::rails::PaymentProof;

use super::{ AppState, InvestmentView };

type HmacSha256 = Hmac<Sha256>;

/// Verify the hex-encoded HMAC-SHA256 signature carried in `x-signature`
/// against the raw request body.
pub fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let signature = hex::decode(signature).map_err(|_| AppError::Unauthorized)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_|
        AppError::Config("Webhook secret is empty".to_string())
    )?;
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| AppError::Unauthorized)
}

// ─── Payment gateway callback ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PaymeeWebhook {
    pub reference: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: Currency,
}

pub async fn paymee_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<Json<InvestmentView>> {
    verify_signature(&state.config.paymee_webhook_secret, &headers, &body)?;

    let payload: PaymeeWebhook = serde_json
        ::from_slice(&body)
        .map_err(|e| AppError::validation(format!("Malformed webhook body: {}", e), "body"))?;

    let row = state.investment_service
        .find_by_gateway_ref(&payload.reference).await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No investment for reference {}", payload.reference))
        })?;

    tracing::info!(
        investment_id = %row.id,
        gateway_ref = %payload.reference,
        status = %payload.status,
        "Gateway webhook received"
    );

    let row = match payload.status.as_str() {
        "paid" => {
            let proof = PaymentProof {
                gateway_ref: Some(payload.reference),
                amount: payload.amount,
                currency: payload.currency,
            };
            state.investment_service.confirm_payment(row.id, proof).await?
        }
        "failed" => {
            state.investment_service.fail_payment(row.id, "Payment failed at gateway").await?
        }
        // "pending" and anything else the gateway may add: acknowledged,
        // no transition.
        _ => row,
    };

    Ok(Json(InvestmentView::from_model(&row)?))
}

// ─── Chain confirmation callback ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChainWebhook {
    pub investment_id: Uuid,
    pub tx_hash: String,
    pub block_number: Option<i64>,
    pub status: String,
}

pub async fn chain_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes
) -> Result<Json<InvestmentView>> {
    verify_signature(&state.config.chain_webhook_secret, &headers, &body)?;

    let payload: ChainWebhook = serde_json
        ::from_slice(&body)
        .map_err(|e| AppError::validation(format!("Malformed webhook body: {}", e), "body"))?;

    tracing::info!(
        investment_id = %payload.investment_id,
        tx_hash = %payload.tx_hash,
        status = %payload.status,
        "Chain webhook received"
    );

    let row = match payload.status.as_str() {
        "mined" => {
            let block_number = payload.block_number.ok_or_else(|| {
                AppError::validation("Mined confirmation requires block_number", "block_number")
            })?;
            state.investment_service.record_chain_confirmation(
                payload.investment_id,
                &payload.tx_hash,
                block_number
            ).await?
        }
        "reverted" => {
            state.investment_service.record_chain_reverted(
                payload.investment_id,
                &format!("Funding transaction {} reverted", payload.tx_hash)
            ).await?
        }
        other => {
            return Err(
                AppError::validation(format!("Unknown chain status: {}", other), "status")
            );
        }
    };

    Ok(Json(InvestmentView::from_model(&row)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", hex::encode(mac.finalize().into_bytes()).parse().unwrap());
        headers
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"reference":"pm-1","status":"paid"}"#;

        let headers = signed_headers("secret", body);
        assert!(verify_signature("secret", &headers, body).is_ok());

        // Wrong secret, tampered body, malformed and missing signatures.
        assert!(matches!(
            verify_signature("other-secret", &headers, body),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_signature("secret", &headers, b"tampered"),
            Err(AppError::Unauthorized)
        ));

        let mut headers = HeaderMap::new();
        headers.insert("x-signature", "zz-not-hex".parse().unwrap());
        assert!(matches!(
            verify_signature("secret", &headers, body),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_signature("secret", &HeaderMap::new(), body),
            Err(AppError::Unauthorized)
        ));
    }
}
