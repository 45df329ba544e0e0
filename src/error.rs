use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")] Database(#[from] sea_orm::DbErr),

    #[error("{message}")] Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Project not accepting funding: {0}")] ProjectClosed(String),

    #[error("Invalid state: {0}")] InvalidState(String),

    #[error("Payment failed: {0}")] PaymentFailed(String),

    #[error("Conflict: {0}")] Conflict(String),

    #[error("Transient external failure: {0}")] Transient(String),

    #[error("Investment not found")]
    InvestmentNotFound,

    #[error("Not found: {0}")] NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Configuration error: {0}")] Config(String),

    #[error("Internal error: {0}")] Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Faults the reconciler is allowed to absorb and retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(serde::Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    pub fn to_error_response(&self) -> ErrorResponse {
        let (code, message, field) = match self {
            AppError::Database(e) => ("DATABASE_ERROR", e.to_string(), None),
            AppError::Validation { message, field } =>
                ("VALIDATION_ERROR", message.clone(), field.clone()),
            AppError::ProjectClosed(msg) => ("PROJECT_CLOSED", msg.clone(), None),
            AppError::InvalidState(msg) => ("INVALID_STATE", msg.clone(), None),
            AppError::PaymentFailed(msg) => ("PAYMENT_FAILED", msg.clone(), None),
            AppError::Conflict(msg) => ("CONFLICT", msg.clone(), None),
            AppError::Transient(msg) => ("TRANSIENT_ERROR", msg.clone(), None),
            AppError::InvestmentNotFound =>
                ("INVESTMENT_NOT_FOUND", "Investment not found".to_string(), None),
            AppError::NotFound(msg) => ("NOT_FOUND", msg.clone(), None),
            AppError::Unauthorized => ("UNAUTHORIZED", "Authentication required".to_string(), None),
            AppError::Forbidden => ("FORBIDDEN", "Not allowed".to_string(), None),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::Internal(msg) => ("INTERNAL_ERROR", msg.clone(), None),
        };

        ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                field,
            },
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::InvestmentNotFound | AppError::NotFound(_) => {
                axum::http::StatusCode::NOT_FOUND
            }
            AppError::Validation { .. } | AppError::PaymentFailed(_) => {
                axum::http::StatusCode::BAD_REQUEST
            }
            | AppError::ProjectClosed(_)
            | AppError::InvalidState(_)
            | AppError::Conflict(_) => {
                axum::http::StatusCode::CONFLICT
            }
            AppError::Unauthorized => axum::http::StatusCode::UNAUTHORIZED,
            AppError::Forbidden => axum::http::StatusCode::FORBIDDEN,
            AppError::Transient(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = self.to_error_response();
        (status, axum::Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
