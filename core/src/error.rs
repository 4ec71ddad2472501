use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::{InstrumentError, LedgerError, OrderError};

/// The single surface-facing error type. Every component error converts
/// into one of these variants, which then maps to exactly the status
/// code named in the error handling table.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or malformed Authorization header")]
    Unauthorized,
    #[error("admin role required")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    UnprocessableEntity(String),
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },
    #[error("not enough resting liquidity to fill this market order")]
    InsufficientLiquidity,
    #[error("exchange temporarily overloaded, retry")]
    Overloaded,
    #[error(transparent)]
    Internal(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
            ApiError::InsufficientLiquidity => StatusCode::BAD_REQUEST,
            ApiError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InstrumentNotFound(t) => ApiError::NotFound(format!("instrument {t} is not admitted")),
            OrderError::InsufficientLiquidity => ApiError::InsufficientLiquidity,
            OrderError::NotFound => ApiError::NotFound("order not found".into()),
            OrderError::CannotCancel(status) => {
                ApiError::BadRequest(format!("order cannot be cancelled: status is {status}"))
            }
            OrderError::Ledger(e) => e.into(),
            OrderError::Database(e) => ApiError::Internal(e),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance { available, required } => {
                ApiError::InsufficientBalance { available, required }
            }
            LedgerError::Overloaded => ApiError::Overloaded,
            LedgerError::Database(e) => ApiError::Internal(e),
        }
    }
}

impl From<InstrumentError> for ApiError {
    fn from(e: InstrumentError) -> Self {
        match e {
            InstrumentError::NotFound(t) => ApiError::NotFound(format!("instrument {t} is not admitted")),
            InstrumentError::AlreadyExists(t) => ApiError::BadRequest(format!("instrument {t} already admitted")),
            InstrumentError::QuoteInstrument => {
                ApiError::BadRequest("the quote instrument cannot be delisted".into())
            }
            InstrumentError::InvalidTicker(t) => {
                ApiError::UnprocessableEntity(format!("ticker {t:?} is invalid: must be 2-10 uppercase ASCII letters"))
            }
            InstrumentError::Database(e) => ApiError::Internal(e),
        }
    }
}
