//! # Storage Traits
//!
//! The storage abstraction the domain layer is written against. Every
//! balance mutation is a single conditional step inside the backend; the
//! services never read a balance and write it back.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::ledger::LedgerEntry;
use crate::domain::models::order::{Order, OrderChange, OrderGuard, PaymentStatus};
use crate::domain::models::settlement::{SettlementRecord, SettlementStatus};
use crate::domain::models::wallet::Wallet;

/// Result of a compare-and-set debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { new_balance: i64 },
    InsufficientFunds { available: i64 },
    WalletMissing,
}

/// Result of claiming a causation id and debiting the buyer in one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenSettlement {
    Opened { new_balance: i64 },
    /// The causation id was already claimed; nothing was debited
    AlreadyOpened(SettlementRecord),
    InsufficientFunds { available: i64 },
    WalletMissing,
}

/// Result of applying one ledger leg together with its balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    Applied { new_balance: i64 },
    /// `(causation_id, leg_key)` is already in the ledger; nothing changed
    AlreadyApplied,
    InsufficientFunds { available: i64 },
    WalletMissing,
}

/// Trait defining the interface for wallet storage operations
#[async_trait]
pub trait WalletStorage: Send + Sync {
    /// Return the wallet, creating it with `opening_balance` if it is missing
    async fn get_or_create_wallet(&self, owner_id: &str, opening_balance: i64) -> Result<Wallet>;

    async fn get_wallet(&self, owner_id: &str) -> Result<Option<Wallet>>;

    /// Subtract `amount` only if the balance covers it, in one atomic step
    async fn try_debit(&self, owner_id: &str, amount: i64) -> Result<DebitOutcome>;

    /// Add `amount`; `None` if the wallet does not exist
    async fn credit(&self, owner_id: &str, amount: i64) -> Result<Option<i64>>;
}

/// Trait defining the interface for the append-only ledger
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Append an entry. Returns false if `(causation_id, leg_key)` already exists.
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<bool>;

    /// All entries for a causation id, in the order they were recorded
    async fn entries_for_causation(&self, causation_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Entries touching `owner_id`, newest first, starting after the `after` entry id
    async fn list_entries_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Credits minus debits recorded for `owner_id`
    async fn net_flow_for_owner(&self, owner_id: &str) -> Result<i64>;
}

/// Settlement records plus the compound steps that must change a record, a
/// ledger leg and a wallet balance together.
#[async_trait]
pub trait SettlementStorage: Send + Sync {
    /// Claim `record.causation_id` and debit the buyer `record.total_amount`
    /// in one transaction. Nothing is written unless both succeed.
    async fn open_settlement(&self, record: &SettlementRecord) -> Result<OpenSettlement>;

    async fn get_settlement(&self, causation_id: &str) -> Result<Option<SettlementRecord>>;

    async fn list_settlements_by_status(&self, status: SettlementStatus) -> Result<Vec<SettlementRecord>>;

    /// Record `entry` and credit `entry.to_owner`, creating the wallet with
    /// `opening_balance` if needed
    async fn apply_credit_leg(&self, entry: &LedgerEntry, opening_balance: i64) -> Result<LegOutcome>;

    /// Record `entry` and debit `entry.from_owner` if the balance covers it
    async fn apply_debit_leg(&self, entry: &LedgerEntry) -> Result<LegOutcome>;

    /// Move a record from `from` to `to`. Returns false if it was not in `from`.
    async fn transition_settlement(
        &self,
        causation_id: &str,
        from: SettlementStatus,
        to: SettlementStatus,
    ) -> Result<bool>;

    /// Enter `reversing`. A settled record starts a new attempt; a record
    /// already reversing resumes its current attempt. `None` otherwise.
    async fn begin_reversal(&self, causation_id: &str) -> Result<Option<u32>>;

    /// Finish a reversal: mark the record reversed and credit the buyer in
    /// one transaction. Returns the buyer's new balance, or `None` if the
    /// record was not reversing.
    async fn complete_reversal(&self, causation_id: &str, buyer_id: &str, amount: i64) -> Result<Option<i64>>;

    /// Give up a reversal attempt and return the record to `settled`
    async fn abort_reversal(&self, causation_id: &str) -> Result<bool>;
}

/// Trait defining the interface for order storage operations
#[async_trait]
pub trait OrderStorage: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>>;

    /// Orders the user bought or is paid for, newest first
    async fn list_orders_for_user(&self, user_id: &str, limit: u32, after: Option<&str>) -> Result<Vec<Order>>;

    /// Apply `change` only if the stored order still satisfies `guard`.
    /// Returns the updated order, or `None` if the guard did not match.
    async fn transition_order(&self, order_id: &str, guard: &OrderGuard, change: &OrderChange) -> Result<Option<Order>>;

    async fn list_orders_by_payment_status(&self, payment_status: PaymentStatus) -> Result<Vec<Order>>;
}

/// Trait defining the interface for storage connections
///
/// Provides factory methods for the repositories, so services can be
/// generic over the backend.
pub trait Connection: Send + Sync + Clone + 'static {
    type WalletRepository: WalletStorage + Clone + 'static;
    type LedgerRepository: LedgerStorage + Clone + 'static;
    type SettlementRepository: SettlementStorage + Clone + 'static;
    type OrderRepository: OrderStorage + Clone + 'static;

    fn create_wallet_repository(&self) -> Self::WalletRepository;
    fn create_ledger_repository(&self) -> Self::LedgerRepository;
    fn create_settlement_repository(&self) -> Self::SettlementRepository;
    fn create_order_repository(&self) -> Self::OrderRepository;
}
