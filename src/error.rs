use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Facilitator error: {0}")]
    Facilitator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("External error: {0}")]
    ExternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Payment pipeline errors. The messages double as classifier input, so the
/// wording must stay in sync with the keyword rules in `risk::errors`.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Subscription is not active")]
    SubscriptionInactive,

    #[error("Auto-pay is disabled for this subscription")]
    AutoPayDisabled,

    #[error("Payment is not due yet")]
    NotDue,

    #[error("Too many consecutive payment failures. Please check your subscription and payment method.")]
    TooManyFailures,

    #[error("Payment settlement failed: {0}")]
    SettlementFailed(String),

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
            ),
            AppError::Payment(PaymentError::SubscriptionNotFound) => (
                StatusCode::NOT_FOUND,
                "SUBSCRIPTION_NOT_FOUND",
                "Subscription not found".to_string(),
            ),
            AppError::Payment(PaymentError::SubscriptionInactive) => (
                StatusCode::BAD_REQUEST,
                "SUBSCRIPTION_INACTIVE",
                "Subscription is not active".to_string(),
            ),
            AppError::Payment(PaymentError::AutoPayDisabled) => (
                StatusCode::BAD_REQUEST,
                "AUTO_PAY_DISABLED",
                "Auto-pay is not enabled for this subscription".to_string(),
            ),
            AppError::Payment(PaymentError::NotDue) => (
                StatusCode::BAD_REQUEST,
                "PAYMENT_NOT_DUE",
                "Payment is not due yet".to_string(),
            ),
            AppError::Payment(PaymentError::TooManyFailures) => (
                StatusCode::CONFLICT,
                "TOO_MANY_FAILURES",
                "Too many consecutive payment failures".to_string(),
            ),
            AppError::Payment(err) => (
                StatusCode::BAD_GATEWAY,
                "PAYMENT_FAILED",
                err.to_string(),
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                format!("Invalid input: {}", msg),
            ),
            AppError::InvalidAddress(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_ADDRESS",
                format!("Invalid address: {}", msg),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details: None,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
