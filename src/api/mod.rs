use std::str::FromStr;
use std::sync::Arc;

use axum::http::HeaderMap;
use sea_orm::prelude::{ DateTimeUtc, Decimal };
use serde::Serialize;
use uuid::Uuid;

pub mod investments;
pub mod webhooks;
pub mod ops;

use crate::config::Config;
use crate::db::entity::investment;
use crate::enums::{ Currency, InvestmentStatus, PaymentMethod };
use crate::error::{ AppError, Result };
use crate::services::InvestmentService;

#[derive(Clone)]
pub struct AppState {
    pub investment_service: Arc<InvestmentService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(investment_service: Arc<InvestmentService>, config: Arc<Config>) -> Self {
        Self { investment_service, config }
    }
}

/// Authenticated user id installed by the upstream auth layer.
pub fn require_user(headers: &HeaderMap) -> Result<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or(AppError::Unauthorized)
}

/// Shared-key check for the operator endpoints.
pub fn require_operator(headers: &HeaderMap, config: &Config) -> Result<()> {
    let provided = headers
        .get("x-operator-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if provided != config.operator_api_key {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Rail-specific columns projected into a tagged variant, so a card
/// investment can never silently carry a wallet transaction link.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RailDetails {
    Wallet {
        #[serde(skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
    },
    Card {
        #[serde(skip_serializing_if = "Option::is_none")]
        gateway_ref: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payment_url: Option<String>,
    },
    BankTransfer {
        #[serde(skip_serializing_if = "Option::is_none")]
        gateway_ref: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestmentView {
    pub id: Uuid,
    pub project_id: i64,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: InvestmentStatus,
    /// True once the funding transaction is mined; equivalent to tx_hash
    /// being present.
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub rail: RailDetails,
    pub investment_date: DateTimeUtc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
}

impl InvestmentView {
    pub fn from_model(row: &investment::Model) -> Result<Self> {
        let method = PaymentMethod::from_str(&row.payment_method)?;
        let status = InvestmentStatus::from_str(&row.status)?;
        let currency = Currency::from_str(&row.currency)?;

        let rail = match method {
            PaymentMethod::Wallet => {
                if row.gateway_ref.is_some() {
                    return Err(
                        AppError::Conflict(
                            format!("Wallet investment {} carries a gateway session", row.id)
                        )
                    );
                }
                RailDetails::Wallet { transaction_id: row.transaction_id }
            }
            PaymentMethod::Card => {
                if row.transaction_id.is_some() {
                    return Err(
                        AppError::Conflict(
                            format!("Card investment {} carries a wallet transaction", row.id)
                        )
                    );
                }
                RailDetails::Card {
                    gateway_ref: row.gateway_ref.clone(),
                    payment_url: row.payment_url.clone(),
                }
            }
            PaymentMethod::BankTransfer => {
                if row.transaction_id.is_some() {
                    return Err(
                        AppError::Conflict(
                            format!("Bank investment {} carries a wallet transaction", row.id)
                        )
                    );
                }
                RailDetails::BankTransfer { gateway_ref: row.gateway_ref.clone() }
            }
        };

        if row.tx_hash.is_some() && status != InvestmentStatus::Confirmed {
            return Err(
                AppError::Conflict(
                    format!("Investment {} has a settlement hash while {}", row.id, row.status)
                )
            );
        }

        Ok(InvestmentView {
            id: row.id,
            project_id: row.project_id,
            amount: row.amount,
            currency,
            status,
            settled: row.tx_hash.is_some(),
            tx_hash: row.tx_hash.clone(),
            rail,
            investment_date: row.investment_date,
            failure_reason: row.failure_reason.clone(),
            needs_review: row.needs_review,
            review_reason: row.review_reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{ Request, StatusCode };
    use axum::routing::{ get, post };
    use axum::Router;
    use hmac::Mac;
    use http_body_util::BodyExt;
    use serde_json::{ json, Value };
    use tower::ServiceExt;

    use crate::config::{ ChainConfig, SettlementPolicy };
    use crate::db::LedgerStore;
    use crate::enums::PaymentMethod;
    use crate::testing::*;

    const OPERATOR_KEY: &str = "operator-key";
    const PAYMEE_SECRET: &str = "paymee-secret";
    const CHAIN_SECRET: &str = "chain-secret";

    fn test_config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            paymee_base_url: "https://gateway.test".to_string(),
            paymee_api_token: "token".to_string(),
            paymee_webhook_secret: PAYMEE_SECRET.to_string(),
            chain_webhook_secret: CHAIN_SECRET.to_string(),
            operator_api_key: OPERATOR_KEY.to_string(),
            gateway_timeout: Duration::from_secs(5),
            chain: ChainConfig {
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 31337,
                operator_private_key: String::new(),
                investment_manager_address: String::new(),
                project_registry_address: String::new(),
                rpc_timeout: Duration::from_secs(5),
            },
            policy: SettlementPolicy::default_for_tests(),
        }
    }

    fn router(h: &TestHarness) -> Router {
        let state = AppState::new(h.service.clone(), std::sync::Arc::new(test_config()));
        Router::new()
            .route(
                "/api/investments",
                post(investments::create_investment).get(investments::list_investments)
            )
            .route("/api/investments/{id}", get(investments::get_investment))
            .route("/api/investments/{id}/cancel", post(investments::cancel_investment))
            .route("/webhooks/paymee", post(webhooks::paymee_webhook))
            .route("/webhooks/chain", post(webhooks::chain_webhook))
            .route("/api/ops/review-queue", get(ops::review_queue))
            .route("/api/ops/investments/{id}/refund", post(ops::refund_investment))
            .with_state(state)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_body() -> Vec<u8> {
        serde_json
            ::to_vec(
                &json!({
                    "project_id": PROJECT,
                    "amount": "1000",
                    "currency": "TND",
                    "payment_method": "card",
                    "user_address": USER_ADDRESS,
                })
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_authentication() {
        let h = harness();

        let response = router(&h)
            .oneshot(
                Request::post("/api/investments")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body()))
                    .unwrap()
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_and_get_investment() {
        let h = harness();
        let app = router(&h);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/investments")
                    .header("content-type", "application/json")
                    .header("x-user-id", USER)
                    .body(Body::from(create_body()))
                    .unwrap()
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["settled"], false);
        assert_eq!(body["rail"]["method"], "card");
        assert!(body["rail"]["payment_url"].is_string());
        let id = body["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/investments/{}", id))
                    .header("x-user-id", USER)
                    .body(Body::empty())
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Another user gets a 404, not a 403.
        let response = app
            .oneshot(
                Request::get(format!("/api/investments/{}", id))
                    .header("x-user-id", "someone-else")
                    .body(Body::empty())
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_amount_with_400() {
        let h = harness();

        let body = serde_json
            ::to_vec(
                &json!({
                    "project_id": PROJECT,
                    "amount": "-5",
                    "currency": "TND",
                    "payment_method": "card",
                    "user_address": USER_ADDRESS,
                })
            )
            .unwrap();

        let response = router(&h)
            .oneshot(
                Request::post("/api/investments")
                    .header("content-type", "application/json")
                    .header("x-user-id", USER)
                    .body(Body::from(body))
                    .unwrap()
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["field"], "amount");
    }

    #[tokio::test]
    async fn test_paymee_webhook_requires_valid_signature() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let body = serde_json
            ::to_vec(
                &json!({
                    "reference": row.gateway_ref.unwrap(),
                    "status": "paid",
                    "amount": "1000",
                    "currency": "TND",
                })
            )
            .unwrap();

        // Missing signature.
        let response = router(&h)
            .oneshot(
                Request::post("/webhooks/paymee")
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Signature over different bytes.
        let response = router(&h)
            .oneshot(
                Request::post("/webhooks/paymee")
                    .header("content-type", "application/json")
                    .header("x-signature", sign(PAYMEE_SECRET, b"other body"))
                    .body(Body::from(body))
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.status, "pending");
    }

    #[tokio::test]
    async fn test_paymee_webhook_confirms_and_tolerates_replay() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let body = serde_json
            ::to_vec(
                &json!({
                    "reference": row.gateway_ref.unwrap(),
                    "status": "paid",
                    "amount": "1000",
                    "currency": "TND",
                })
            )
            .unwrap();
        let signature = sign(PAYMEE_SECRET, &body);

        let app = router(&h);
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/webhooks/paymee")
                        .header("content-type", "application/json")
                        .header("x-signature", signature.clone())
                        .body(Body::from(body.clone()))
                        .unwrap()
                ).await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["status"], "confirmed");
        }

        assert_eq!(h.chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_paymee_webhook_unknown_reference_is_404() {
        let h = harness();
        let body = serde_json
            ::to_vec(
                &json!({
                    "reference": "pm-unknown",
                    "status": "paid",
                    "amount": "1000",
                    "currency": "TND",
                })
            )
            .unwrap();

        let response = router(&h)
            .oneshot(
                Request::post("/webhooks/paymee")
                    .header("content-type", "application/json")
                    .header("x-signature", sign(PAYMEE_SECRET, &body))
                    .body(Body::from(body))
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chain_webhook_settles_investment() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;
        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        let hash = h.chain.last_submitted_hash().unwrap();

        let body = serde_json
            ::to_vec(
                &json!({
                    "investment_id": row.id,
                    "tx_hash": hash,
                    "block_number": 1234,
                    "status": "mined",
                })
            )
            .unwrap();

        let response = router(&h)
            .oneshot(
                Request::post("/webhooks/chain")
                    .header("content-type", "application/json")
                    .header("x-signature", sign(CHAIN_SECRET, &body))
                    .body(Body::from(body))
                    .unwrap()
            ).await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["settled"], true);
        assert_eq!(json["tx_hash"], hash.as_str());
    }

    #[tokio::test]
    async fn test_operator_endpoints_are_gated() {
        let h = harness();
        let app = router(&h);

        let response = app
            .clone()
            .oneshot(Request::get("/api/ops/review-queue").body(Body::empty()).unwrap()).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/ops/review-queue")
                    .header("x-operator-key", "wrong")
                    .body(Body::empty())
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                Request::get("/api/ops/review-queue")
                    .header("x-operator-key", OPERATOR_KEY)
                    .body(Body::empty())
                    .unwrap()
            ).await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_view_rejects_cross_rail_rows() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        let mut broken = h.ledger.investment(row.id).await.unwrap();
        broken.transaction_id = Some(Uuid::new_v4());
        assert!(InvestmentView::from_model(&broken).is_err());

        let mut broken = h.ledger.investment(row.id).await.unwrap();
        broken.tx_hash = Some("0xfeed0000".to_string());
        // Still pending: a settlement hash here is incoherent.
        assert!(InvestmentView::from_model(&broken).is_err());
    }
}
