//! # Domain Module
//!
//! Business logic for the marketplace's custodial wallets.
//!
//! Buyers pay from an in-app wallet. Each payment is split into a payee
//! share per seller/provider/organizer and one platform commission leg, and
//! every movement of money is written to an append-only ledger. A paid
//! order can only be cancelled by refunding it in full.
//!
//! ## Module Organization
//!
//! - **wallet_service**: Wallet lookup, opening balances, guarded debits and credits
//! - **ledger_service**: Ledger queries, manual leg recording and reconciliation
//! - **commission**: Commission rates and the policy that picks one per payment
//! - **settlement_service**: Debit the buyer once, then credit every leg
//! - **reversal_service**: Take every leg back and refund the buyer, or nothing
//! - **order_service**: Products, bookings and event registrations plus their state machine
//! - **payment_validation**: Format checks for card and UPI details
//! - **commands**: Command, query and result types passed across the service boundary
//! - **errors**: One error enum per service
//!
//! ## Business Rules
//!
//! - Wallet balances never go negative
//! - A causation id (the order id) settles at most once, however often it is retried
//! - Ledger entries are never updated or deleted; corrections are new entries
//! - For every wallet, opening balance plus net ledger flow equals the balance
//! - Refunds are all or nothing; a payee who cannot cover their share blocks the refund
//! - Only one payment operation per order may be in flight at a time

pub mod commands;
pub mod commission;
pub mod errors;
pub mod ledger_service;
pub mod models;
pub mod order_service;
pub mod payment_validation;
pub mod reversal_service;
pub mod settlement_service;
pub mod wallet_service;

pub use commission::{CommissionPolicy, CommissionRate, ContextCommissionPolicy, FlatCommissionPolicy};
pub use errors::{LedgerError, OrderError, ReversalError, SettlementError, WalletError};
pub use ledger_service::LedgerService;
pub use order_service::OrderService;
pub use reversal_service::ReversalService;
pub use settlement_service::SettlementService;
pub use wallet_service::WalletService;
