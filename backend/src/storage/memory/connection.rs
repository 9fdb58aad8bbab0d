use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::models::ledger::LedgerEntry;
use crate::domain::models::order::Order;
use crate::domain::models::settlement::SettlementRecord;
use crate::domain::models::wallet::Wallet;
use crate::storage::traits::Connection;

use super::MemoryRepository;

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub wallets: HashMap<String, Wallet>,
    pub ledger: Vec<LedgerEntry>,
    pub leg_keys: HashSet<(String, String)>,
    pub settlements: HashMap<String, SettlementRecord>,
    pub orders: HashMap<String, Order>,
    /// Order ids in insertion order, for newest-first listing
    pub order_sequence: Vec<String>,
    pub faults: FaultPlan,
}

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    /// Number of upcoming credit legs that fail with a storage error
    pub credit_faults: u32,
    /// Per-owner count of upcoming credit legs that fail with a storage error
    pub owner_credit_faults: HashMap<String, u32>,
    /// Per-owner count of upcoming refund debits that fail with a storage error
    pub debit_faults: HashMap<String, u32>,
    /// Owners whose next refund debit reports a shortfall
    pub debit_shortfalls: HashSet<String>,
}

/// In-process storage backend. Each primitive takes the lock once, does its
/// work, and releases it before returning; nothing is held across an await.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<MemoryState>> {
        &self.state
    }
}

/// Fault injection and balance seeding. Compiled for unit tests and for
/// the integration tests through the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
impl MemoryConnection {
    /// Make the next `count` credit legs fail as if storage were unavailable
    pub fn inject_credit_faults(&self, count: u32) {
        self.state.lock().faults.credit_faults = count;
    }

    /// Make the next `count` credit legs to `owner_id` fail with a storage error
    pub fn inject_credit_faults_for(&self, owner_id: &str, count: u32) {
        self.state
            .lock()
            .faults
            .owner_credit_faults
            .insert(owner_id.to_string(), count);
    }

    /// Make the next `count` refund debits against `owner_id` fail with a
    /// storage error before anything is written
    pub fn inject_debit_faults(&self, owner_id: &str, count: u32) {
        self.state.lock().faults.debit_faults.insert(owner_id.to_string(), count);
    }

    /// Make the next refund debit against `owner_id` come back short, as if
    /// the payee spent the money between the dry-run and the debit
    pub fn inject_debit_shortfall(&self, owner_id: &str) {
        self.state.lock().faults.debit_shortfalls.insert(owner_id.to_string());
    }

    /// Set a balance directly, bypassing the ledger. Test setup only.
    pub fn set_balance(&self, owner_id: &str, balance: i64) {
        let mut state = self.state.lock();
        let wallet = state
            .wallets
            .entry(owner_id.to_string())
            .or_insert_with(|| Wallet::open(owner_id, balance));
        wallet.balance = balance;
        wallet.opening_balance = balance;
    }
}

impl Connection for MemoryConnection {
    type WalletRepository = MemoryRepository;
    type LedgerRepository = MemoryRepository;
    type SettlementRepository = MemoryRepository;
    type OrderRepository = MemoryRepository;

    fn create_wallet_repository(&self) -> Self::WalletRepository {
        MemoryRepository::new(self.clone())
    }

    fn create_ledger_repository(&self) -> Self::LedgerRepository {
        MemoryRepository::new(self.clone())
    }

    fn create_settlement_repository(&self) -> Self::SettlementRepository {
        MemoryRepository::new(self.clone())
    }

    fn create_order_repository(&self) -> Self::OrderRepository {
        MemoryRepository::new(self.clone())
    }
}
