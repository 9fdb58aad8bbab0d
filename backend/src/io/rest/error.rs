//! Mapping from domain errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use shared::{ErrorResponse, InsufficientFundsResponse};
use tracing::{error, warn};

use crate::domain::errors::{LedgerError, OrderError, ReversalError, SettlementError, WalletError};

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Order(OrderError),
    Wallet(WalletError),
    Ledger(LedgerError),
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        ApiError::Wallet(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

fn body(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    let message = message.into();
    if status.is_client_error() {
        warn!("Request rejected with {} {}: {}", status.as_u16(), error, message);
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

fn insufficient_funds(required: i64, available: i64) -> Response {
    warn!("Charge declined: required {}, available {}", required, available);
    (
        StatusCode::BAD_REQUEST,
        Json(InsufficientFundsResponse {
            error: "InsufficientFunds".to_string(),
            required,
            available,
            shortfall: required - available,
        }),
    )
        .into_response()
}

fn internal(err: &dyn std::fmt::Display) -> Response {
    error!("Internal error: {}", err);
    body(
        StatusCode::INTERNAL_SERVER_ERROR,
        "InternalError",
        "Something went wrong on our side",
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => body(
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "Missing X-User-Id header",
            ),
            ApiError::BadRequest(message) => body(StatusCode::BAD_REQUEST, "ValidationError", message),
            ApiError::Wallet(err) => match err {
                WalletError::InsufficientFunds { required, available } => insufficient_funds(required, available),
                WalletError::InvalidAmount(_) => body(StatusCode::BAD_REQUEST, "ValidationError", err.to_string()),
                // Wallets are created on first use, so a missing one is our fault
                WalletError::WalletNotFound(_) | WalletError::Storage(_) => internal(&err),
            },
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidEntry(_) => body(StatusCode::BAD_REQUEST, "ValidationError", err.to_string()),
                LedgerError::DuplicateLeg { .. } => body(StatusCode::CONFLICT, "DuplicateLeg", err.to_string()),
                LedgerError::Storage(_) => internal(&err),
            },
            ApiError::Order(err) => order_error_response(err),
        }
    }
}

fn order_error_response(err: OrderError) -> Response {
    match err {
        OrderError::NotFound(_) => body(StatusCode::NOT_FOUND, "NotFound", err.to_string()),
        OrderError::Forbidden(_) => body(StatusCode::FORBIDDEN, "Forbidden", err.to_string()),
        OrderError::Validation(_) => body(StatusCode::BAD_REQUEST, "ValidationError", err.to_string()),
        OrderError::InvalidPayment(_) => body(StatusCode::BAD_REQUEST, "InvalidPaymentMethod", err.to_string()),
        OrderError::InvalidTransition { .. } => body(StatusCode::CONFLICT, "InvalidTransition", err.to_string()),
        OrderError::ConcurrentSettlementConflict { .. } => {
            body(StatusCode::CONFLICT, "ConcurrentSettlementConflict", err.to_string())
        }
        // Money is parked until recovery resumes the refund
        OrderError::Reversal(ReversalError::Storage(_)) => internal(&err),
        OrderError::Reversal(reversal) => body(StatusCode::CONFLICT, "ReversalFailed", reversal.to_string()),
        OrderError::Settlement(SettlementError::InsufficientFunds { required, available })
        | OrderError::Wallet(WalletError::InsufficientFunds { required, available }) => {
            insufficient_funds(required, available)
        }
        OrderError::Settlement(SettlementError::CreditIncomplete { ref causation_id, .. }) => {
            // The buyer was charged; recovery will finish paying out
            error!("Settlement {} incomplete: {}", causation_id, err);
            body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PaymentProcessing",
                "Payment was taken and is still being processed",
            )
        }
        other => internal(&other),
    }
}
