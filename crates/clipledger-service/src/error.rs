//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use clipledger_core::LedgerError;
use clipledger_store::StoreError;

use crate::objects::ObjectStoreError;
use crate::payments::PaymentError;

/// Errors raised by the ledger, job, code and payment services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A ledger rule refused the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A webhook carried no valid signature. Nothing was changed.
    #[error("webhook signature missing or invalid")]
    WebhookUnverified,

    /// A verified webhook body could not be decoded.
    #[error("malformed webhook payload: {0}")]
    MalformedEvent(String),

    /// A collaborator needed for this operation is not configured.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// The payment provider failed.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The object store failed.
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

/// Service result type.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already claimed or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Temporarily unable to serve the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
            Self::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredit { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::CodeNotFound
            | LedgerError::JobNotFound { .. }
            | LedgerError::TransactionNotFound { .. } => Self::NotFound(err.to_string()),
            LedgerError::CodeAlreadyRedeemed => Self::Conflict(err.to_string()),
            LedgerError::InvalidAmount(_) | LedgerError::InvalidId(_) => {
                Self::BadRequest(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("resource not found".into()),
            StoreError::AlreadyExists(what) => Self::Conflict(format!("already exists: {what}")),
            StoreError::Overflow => Self::BadRequest("amount would overflow the balance".into()),
            StoreError::Contention { attempts } => {
                tracing::warn!(attempts, "Storage contention exhausted retries");
                Self::Unavailable("storage is busy, retry the request".into())
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Ledger(e) => e.into(),
            ServiceError::Store(e) => e.into(),
            ServiceError::InvalidInput(msg) | ServiceError::MalformedEvent(msg) => {
                Self::BadRequest(msg)
            }
            ServiceError::WebhookUnverified => Self::BadRequest(err.to_string()),
            ServiceError::NotConfigured(_) => Self::Unavailable(err.to_string()),
            ServiceError::Payment(e) => {
                tracing::warn!(error = %e, "Payment provider call failed");
                Self::ExternalService("payment provider unavailable".into())
            }
            ServiceError::ObjectStore(e) => {
                tracing::warn!(error = %e, "Object store call failed");
                Self::ExternalService("object store unavailable".into())
            }
        }
    }
}
