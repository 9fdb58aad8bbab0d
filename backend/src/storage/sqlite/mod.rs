//! # SQLite Storage Module
//!
//! SQLite implementations of the storage traits.
//!
//! ## Components
//!
//! - **connection.rs** - pool setup, pragmas and schema
//! - **wallet_repository.rs** - wallet rows and the conditional debit
//! - **ledger_repository.rs** - append-only ledger entries
//! - **settlement_repository.rs** - settlement records and the compound leg steps
//! - **order_repository.rs** - orders and their lines
//!
//! Every transaction opens with a write so SQLite takes the write lock up
//! front instead of upgrading a read lock mid-transaction.

pub mod connection;
pub mod ledger_repository;
pub mod order_repository;
pub mod settlement_repository;
pub mod wallet_repository;

pub use connection::DbConnection;
pub use ledger_repository::LedgerRepository;
pub use order_repository::OrderRepository;
pub use settlement_repository::SettlementRepository;
pub use wallet_repository::WalletRepository;
