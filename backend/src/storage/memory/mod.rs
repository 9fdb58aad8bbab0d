//! # In-memory Storage Module
//!
//! A process-local backend with the same atomicity guarantees as SQLite,
//! used by the domain tests. It also lets tests inject storage faults.

pub mod connection;
pub mod repositories;

pub use connection::MemoryConnection;
pub use repositories::MemoryRepository;
