use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;

use crate::domain::models::ledger::LedgerEntry;
use crate::domain::models::order::{Order, OrderChange, OrderGuard, PaymentStatus};
use crate::domain::models::settlement::{SettlementRecord, SettlementStatus};
use crate::domain::models::wallet::Wallet;
use crate::storage::traits::{
    DebitOutcome, LedgerStorage, LegOutcome, OpenSettlement, OrderStorage, SettlementStorage,
    WalletStorage,
};

use super::connection::MemoryState;
use super::MemoryConnection;

/// One repository type serves every storage trait over the shared state
#[derive(Clone)]
pub struct MemoryRepository {
    connection: MemoryConnection,
}

impl MemoryRepository {
    pub fn new(connection: MemoryConnection) -> Self {
        Self { connection }
    }
}

impl MemoryState {
    fn debit(&mut self, owner_id: &str, amount: i64) -> DebitOutcome {
        match self.wallets.get_mut(owner_id) {
            Some(wallet) if wallet.balance >= amount => {
                wallet.balance -= amount;
                wallet.version += 1;
                wallet.updated_at = Utc::now();
                DebitOutcome::Debited {
                    new_balance: wallet.balance,
                }
            }
            Some(wallet) => DebitOutcome::InsufficientFunds {
                available: wallet.balance,
            },
            None => DebitOutcome::WalletMissing,
        }
    }

    fn credit(&mut self, owner_id: &str, amount: i64) -> Option<i64> {
        let wallet = self.wallets.get_mut(owner_id)?;
        wallet.balance += amount;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Some(wallet.balance)
    }

    fn has_leg(&self, entry: &LedgerEntry) -> bool {
        self.leg_keys
            .contains(&(entry.causation_id.clone(), entry.leg_key.clone()))
    }

    fn record_leg(&mut self, entry: &LedgerEntry) {
        self.leg_keys
            .insert((entry.causation_id.clone(), entry.leg_key.clone()));
        self.ledger.push(entry.clone());
    }

    /// Consume one injected fault for `owner_id`, if any is armed
    fn take_fault(faults: &mut HashMap<String, u32>, owner_id: &str) -> bool {
        match faults.get_mut(owner_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn move_settlement(&mut self, causation_id: &str, from: SettlementStatus, to: SettlementStatus) -> bool {
        match self.settlements.get_mut(causation_id) {
            Some(record) if record.status == from => {
                record.status = to;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl WalletStorage for MemoryRepository {
    async fn get_or_create_wallet(&self, owner_id: &str, opening_balance: i64) -> Result<Wallet> {
        let mut state = self.connection.state().lock();
        let wallet = state
            .wallets
            .entry(owner_id.to_string())
            .or_insert_with(|| Wallet::open(owner_id, opening_balance));
        Ok(wallet.clone())
    }

    async fn get_wallet(&self, owner_id: &str) -> Result<Option<Wallet>> {
        Ok(self.connection.state().lock().wallets.get(owner_id).cloned())
    }

    async fn try_debit(&self, owner_id: &str, amount: i64) -> Result<DebitOutcome> {
        Ok(self.connection.state().lock().debit(owner_id, amount))
    }

    async fn credit(&self, owner_id: &str, amount: i64) -> Result<Option<i64>> {
        Ok(self.connection.state().lock().credit(owner_id, amount))
    }
}

#[async_trait]
impl LedgerStorage for MemoryRepository {
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<bool> {
        let mut state = self.connection.state().lock();
        if state.has_leg(entry) {
            return Ok(false);
        }
        state.record_leg(entry);
        Ok(true)
    }

    async fn entries_for_causation(&self, causation_id: &str) -> Result<Vec<LedgerEntry>> {
        let state = self.connection.state().lock();
        Ok(state
            .ledger
            .iter()
            .filter(|entry| entry.causation_id == causation_id)
            .cloned()
            .collect())
    }

    async fn list_entries_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.connection.state().lock();
        let end = match after {
            Some(after_id) => match state.ledger.iter().position(|entry| entry.id == after_id) {
                Some(position) => position,
                None => return Ok(Vec::new()),
            },
            None => state.ledger.len(),
        };
        Ok(state.ledger[..end]
            .iter()
            .rev()
            .filter(|entry| entry.touches(owner_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn net_flow_for_owner(&self, owner_id: &str) -> Result<i64> {
        let state = self.connection.state().lock();
        Ok(state.ledger.iter().map(|entry| entry.net_for(owner_id)).sum())
    }
}

#[async_trait]
impl SettlementStorage for MemoryRepository {
    async fn open_settlement(&self, record: &SettlementRecord) -> Result<OpenSettlement> {
        let mut state = self.connection.state().lock();
        if let Some(existing) = state.settlements.get(&record.causation_id) {
            return Ok(OpenSettlement::AlreadyOpened(existing.clone()));
        }
        match state.debit(&record.buyer_id, record.total_amount) {
            DebitOutcome::Debited { new_balance } => {
                let mut stored = record.clone();
                stored.status = SettlementStatus::Debited;
                state.settlements.insert(record.causation_id.clone(), stored);
                Ok(OpenSettlement::Opened { new_balance })
            }
            DebitOutcome::InsufficientFunds { available } => Ok(OpenSettlement::InsufficientFunds { available }),
            DebitOutcome::WalletMissing => Ok(OpenSettlement::WalletMissing),
        }
    }

    async fn get_settlement(&self, causation_id: &str) -> Result<Option<SettlementRecord>> {
        Ok(self.connection.state().lock().settlements.get(causation_id).cloned())
    }

    async fn list_settlements_by_status(&self, status: SettlementStatus) -> Result<Vec<SettlementRecord>> {
        let state = self.connection.state().lock();
        let mut records: Vec<SettlementRecord> = state
            .settlements
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn apply_credit_leg(&self, entry: &LedgerEntry, opening_balance: i64) -> Result<LegOutcome> {
        let mut state = self.connection.state().lock();
        if state.faults.credit_faults > 0 {
            state.faults.credit_faults -= 1;
            anyhow::bail!("Injected storage fault while crediting {}", entry.to_owner);
        }
        if MemoryState::take_fault(&mut state.faults.owner_credit_faults, &entry.to_owner) {
            anyhow::bail!("Injected storage fault while crediting {}", entry.to_owner);
        }
        if state.has_leg(entry) {
            return Ok(LegOutcome::AlreadyApplied);
        }
        state
            .wallets
            .entry(entry.to_owner.clone())
            .or_insert_with(|| Wallet::open(&entry.to_owner, opening_balance));
        match state.credit(&entry.to_owner, entry.amount) {
            Some(new_balance) => {
                state.record_leg(entry);
                Ok(LegOutcome::Applied { new_balance })
            }
            None => Ok(LegOutcome::WalletMissing),
        }
    }

    async fn apply_debit_leg(&self, entry: &LedgerEntry) -> Result<LegOutcome> {
        let mut state = self.connection.state().lock();
        if MemoryState::take_fault(&mut state.faults.debit_faults, &entry.from_owner) {
            anyhow::bail!("Injected storage fault while debiting {}", entry.from_owner);
        }
        if state.has_leg(entry) {
            return Ok(LegOutcome::AlreadyApplied);
        }
        if state.faults.debit_shortfalls.remove(&entry.from_owner) {
            let available = state.wallets.get(&entry.from_owner).map_or(0, |w| w.balance);
            return Ok(LegOutcome::InsufficientFunds {
                available: available.min(entry.amount - 1),
            });
        }
        match state.debit(&entry.from_owner, entry.amount) {
            DebitOutcome::Debited { new_balance } => {
                state.record_leg(entry);
                Ok(LegOutcome::Applied { new_balance })
            }
            DebitOutcome::InsufficientFunds { available } => Ok(LegOutcome::InsufficientFunds { available }),
            DebitOutcome::WalletMissing => Ok(LegOutcome::WalletMissing),
        }
    }

    async fn transition_settlement(
        &self,
        causation_id: &str,
        from: SettlementStatus,
        to: SettlementStatus,
    ) -> Result<bool> {
        Ok(self.connection.state().lock().move_settlement(causation_id, from, to))
    }

    async fn begin_reversal(&self, causation_id: &str) -> Result<Option<u32>> {
        let mut state = self.connection.state().lock();
        let Some(record) = state.settlements.get_mut(causation_id) else {
            return Ok(None);
        };
        match record.status {
            SettlementStatus::Settled => {
                record.status = SettlementStatus::Reversing;
                record.reversal_attempt += 1;
                record.updated_at = Utc::now();
                Ok(Some(record.reversal_attempt))
            }
            SettlementStatus::Reversing => Ok(Some(record.reversal_attempt)),
            _ => Ok(None),
        }
    }

    async fn complete_reversal(&self, causation_id: &str, buyer_id: &str, amount: i64) -> Result<Option<i64>> {
        let mut state = self.connection.state().lock();
        let reversing = state
            .settlements
            .get(causation_id)
            .is_some_and(|record| record.status == SettlementStatus::Reversing);
        if !reversing {
            return Ok(None);
        }
        if !state.wallets.contains_key(buyer_id) {
            anyhow::bail!("Buyer wallet {} missing during reversal", buyer_id);
        }
        state.move_settlement(causation_id, SettlementStatus::Reversing, SettlementStatus::Reversed);
        Ok(state.credit(buyer_id, amount))
    }

    async fn abort_reversal(&self, causation_id: &str) -> Result<bool> {
        Ok(self.connection.state().lock().move_settlement(
            causation_id,
            SettlementStatus::Reversing,
            SettlementStatus::Settled,
        ))
    }
}

#[async_trait]
impl OrderStorage for MemoryRepository {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.connection.state().lock();
        if state.orders.contains_key(&order.id) {
            anyhow::bail!("Order {} already exists", order.id);
        }
        state.orders.insert(order.id.clone(), order.clone());
        state.order_sequence.push(order.id.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.connection.state().lock().orders.get(order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: &str, limit: u32, after: Option<&str>) -> Result<Vec<Order>> {
        let state = self.connection.state().lock();
        let end = match after {
            Some(after_id) => match state.order_sequence.iter().position(|id| id == after_id) {
                Some(position) => position,
                None => return Ok(Vec::new()),
            },
            None => state.order_sequence.len(),
        };
        Ok(state.order_sequence[..end]
            .iter()
            .rev()
            .filter_map(|id| state.orders.get(id))
            .filter(|order| order.involves(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn transition_order(&self, order_id: &str, guard: &OrderGuard, change: &OrderChange) -> Result<Option<Order>> {
        let mut state = self.connection.state().lock();
        match state.orders.get_mut(order_id) {
            Some(order) if guard.matches(order) => {
                change.apply_to(order);
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_orders_by_payment_status(&self, payment_status: PaymentStatus) -> Result<Vec<Order>> {
        let state = self.connection.state().lock();
        Ok(state
            .order_sequence
            .iter()
            .filter_map(|id| state.orders.get(id))
            .filter(|order| order.payment_status == payment_status)
            .cloned()
            .collect())
    }
}
