// src/error.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures of the pure balance arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("balance overflow")]
    Overflow,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization failure, deadlock, lock or statement timeout. Safe to retry.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available, query_canceled
                Some("40001") | Some("40P01") | Some("55P03") | Some("57014") => {
                    StoreError::Conflict(db_err.message().to_string())
                }
                Some("23505") => StoreError::Duplicate(db_err.message().to_string()),
                Some("23503") => StoreError::NotFound(db_err.message().to_string()),
                _ => StoreError::Database(err),
            },
            sqlx::Error::PoolTimedOut => StoreError::Conflict("connection pool timed out".into()),
            _ => StoreError::Database(err),
        }
    }
}

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("viewer not found: {0}")]
    ViewerNotFound(Uuid),

    #[error("item owner not found: {0}")]
    OwnerNotFound(Uuid),

    #[error("insufficient tokens: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("settlement transaction failed after retry: {0}")]
    TransactionFailure(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("plan not found: {0}")]
    PlanNotFound(i32),

    #[error("payment order not found: {0}")]
    OrderNotFound(String),

    #[error("payment order already processed: {0}")]
    OrderAlreadyProcessed(String),

    #[error("invalid payment signature")]
    InvalidSignature,

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        PaymentError::Gateway(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token encoding failed: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("no active sessions for user {0}")]
    NoSubscribers(Uuid),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Error type returned by every HTTP handler.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => "validation_error",
            ApiError::Settlement(err) => match err {
                SettlementError::ItemNotFound(_)
                | SettlementError::ViewerNotFound(_)
                | SettlementError::OwnerNotFound(_) => "not_found",
                SettlementError::InsufficientFunds { .. } => "insufficient_funds",
                SettlementError::TransactionFailure(_) => "transaction_failure",
                SettlementError::Storage(_) => "internal_error",
            },
            ApiError::Payment(err) => match err {
                PaymentError::PlanNotFound(_) | PaymentError::OrderNotFound(_) => "not_found",
                PaymentError::OrderAlreadyProcessed(_) => "duplicate_error",
                PaymentError::InvalidSignature => "invalid_signature",
                PaymentError::Gateway(_) => "gateway_error",
                PaymentError::Storage(_) => "internal_error",
            },
            ApiError::Auth(AuthError::Encoding(_) | AuthError::Hashing(_)) => "internal_error",
            ApiError::Auth(_) => "unauthorized",
            ApiError::Store(StoreError::Duplicate(_)) => "duplicate_error",
            ApiError::Store(StoreError::NotFound(_)) => "not_found",
            ApiError::Store(_) => "internal_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "duplicate_error",
        }
    }

    /// Server-side failures are logged in full and rendered without detail.
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Settlement(err) => match err {
                SettlementError::ItemNotFound(_)
                | SettlementError::ViewerNotFound(_)
                | SettlementError::OwnerNotFound(_) => StatusCode::NOT_FOUND,
                SettlementError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
                SettlementError::TransactionFailure(_) | SettlementError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Payment(err) => match err {
                PaymentError::PlanNotFound(_) | PaymentError::OrderNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                PaymentError::OrderAlreadyProcessed(_) => StatusCode::CONFLICT,
                PaymentError::InvalidSignature => StatusCode::BAD_REQUEST,
                PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
                PaymentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(AuthError::Encoding(_) | AuthError::Hashing(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.public_message(),
                "type": self.error_type(),
            }
        });

        if let ApiError::Settlement(SettlementError::InsufficientFunds { balance, required }) = self {
            body["error"]["balance"] = json!(balance);
            body["error"]["required"] = json!(required);
        }

        HttpResponse::build(status).json(body)
    }
}
