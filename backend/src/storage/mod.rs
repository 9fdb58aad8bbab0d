//! # Storage Module
//!
//! Persistence for wallets, the ledger, settlement records and orders.
//!
//! The domain layer only sees the traits in [`traits`]. Two backends
//! implement them:
//!
//! - **sqlite** - the production store (sqlx, WAL journal)
//! - **memory** - an in-process store for tests, with fault injection
//!
//! Every operation that must move money and write a ledger leg together is
//! a single storage call, so each backend can make it atomic.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemoryConnection;
pub use sqlite::DbConnection;
pub use traits::{
    Connection, DebitOutcome, LedgerStorage, LegOutcome, OpenSettlement, OrderStorage,
    SettlementStorage, WalletStorage,
};
