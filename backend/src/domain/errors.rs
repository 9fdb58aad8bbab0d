//! Error types for the settlement core.
//!
//! Each service has its own enum so callers can match on exactly the
//! failures that operation can produce. Storage faults are carried as
//! `anyhow::Error` the way the repositories report them.

use thiserror::Error;

use crate::domain::models::settlement::SettlementStatus;
use crate::domain::models::order::{OrderStatus, PaymentStatus};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("Leg {leg_key} already recorded for {causation_id}")]
    DuplicateLeg { causation_id: String, leg_key: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Invalid settlement plan: {0}")]
    InvalidPlan(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Buyer was debited but a credit leg could not be applied; the
    /// settlement stays `debited` and recovery will finish it.
    #[error("Credit leg {leg_key} for {causation_id} not applied")]
    CreditIncomplete {
        causation_id: String,
        leg_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Settlement not found for {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReversalError {
    #[error("Payee {payee_id} holds {available} but the reversal needs {required}")]
    PartialPayeeShortfall {
        payee_id: String,
        required: i64,
        available: i64,
    },

    #[error("Settlement not found for {0}")]
    SettlementNotFound(String),

    #[error("Settlement {causation_id} is {status}, not settled")]
    NotSettled {
        causation_id: String,
        status: SettlementStatus,
    },

    #[error("No settlement legs recorded for {0}")]
    NoLegs(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Settlement {0} changed while reversing")]
    Conflict(String),

    #[error("Reversal of {0} was interrupted and has been rolled back")]
    RolledBack(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<WalletError> for SettlementError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InsufficientFunds { required, available } => {
                SettlementError::InsufficientFunds { required, available }
            }
            WalletError::WalletNotFound(owner_id) => SettlementError::WalletNotFound(owner_id),
            WalletError::InvalidAmount(amount) => {
                SettlementError::InvalidPlan(format!("non-positive amount {}", amount))
            }
            WalletError::Storage(source) => SettlementError::Storage(source),
        }
    }
}

impl From<WalletError> for ReversalError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::WalletNotFound(owner_id) => ReversalError::WalletNotFound(owner_id),
            WalletError::Storage(source) => ReversalError::Storage(source),
            other => ReversalError::Storage(anyhow::Error::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentValidationError {
    #[error("Card number must be 13 to 19 digits")]
    CardNumberLength,

    #[error("Card number failed checksum")]
    CardChecksum,

    #[error("Expiry must be MM/YY")]
    ExpiryFormat,

    #[error("Card has expired")]
    CardExpired,

    #[error("CVV must be 3 or 4 digits")]
    Cvv,

    #[error("Card holder name is required")]
    HolderName,

    #[error("UPI id must look like handle@provider")]
    UpiFormat,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Invalid order: {0}")]
    Validation(String),

    #[error("Invalid payment method: {0}")]
    InvalidPayment(#[from] PaymentValidationError),

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {order_id} already has a payment operation in flight ({payment_status})")]
    ConcurrentSettlementConflict {
        order_id: String,
        payment_status: PaymentStatus,
    },

    #[error("Order {0} is paid but has no settlement reference")]
    MissingSettlementRef(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Reversal(#[from] ReversalError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_message_names_the_payee() {
        let err = ReversalError::PartialPayeeShortfall {
            payee_id: "seller-1".to_string(),
            required: 1_121,
            available: 50,
        };
        assert_eq!(
            err.to_string(),
            "Payee seller-1 holds 50 but the reversal needs 1121"
        );
    }

    #[test]
    fn test_order_error_wraps_settlement_error() {
        let err: OrderError = SettlementError::InsufficientFunds {
            required: 1_000,
            available: 500,
        }
        .into();
        assert!(matches!(
            err,
            OrderError::Settlement(SettlementError::InsufficientFunds { .. })
        ));
    }
}
