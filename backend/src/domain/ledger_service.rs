//! Ledger service: the append-only record of every money movement.
//!
//! Entries are never edited or removed. Corrections are new entries
//! (refund or adjustment legs) under the same causation id.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PageConfig;
use crate::domain::commands::ledger::{LedgerListQuery, LedgerListResult, ReconciliationReport};
use crate::domain::commands::PaginationInfo;
use crate::domain::errors::LedgerError;
use crate::domain::models::ledger::LedgerEntry;
use crate::storage::{Connection, LedgerStorage, WalletStorage};

#[derive(Clone)]
pub struct LedgerService<C: Connection> {
    ledger_repository: C::LedgerRepository,
    wallet_repository: C::WalletRepository,
    paging: PageConfig,
}

impl<C: Connection> LedgerService<C> {
    pub fn new(connection: Arc<C>, paging: PageConfig) -> Self {
        Self {
            ledger_repository: connection.create_ledger_repository(),
            wallet_repository: connection.create_wallet_repository(),
            paging,
        }
    }

    /// Append a standalone entry (one with no balance change attached)
    pub async fn record(&self, entry: &LedgerEntry) -> Result<LedgerEntry, LedgerError> {
        if entry.amount <= 0 {
            return Err(LedgerError::InvalidEntry(format!(
                "amount must be positive, got {}",
                entry.amount
            )));
        }
        if entry.from_owner == entry.to_owner {
            return Err(LedgerError::InvalidEntry(format!(
                "{} cannot pay itself",
                entry.from_owner
            )));
        }
        if entry.causation_id.trim().is_empty() || entry.leg_key.trim().is_empty() {
            return Err(LedgerError::InvalidEntry(
                "causation id and leg key are required".to_string(),
            ));
        }

        if !self.ledger_repository.append_entry(entry).await? {
            return Err(LedgerError::DuplicateLeg {
                causation_id: entry.causation_id.clone(),
                leg_key: entry.leg_key.clone(),
            });
        }
        info!(
            "Recorded {} leg {} for {}: {} -> {} ({})",
            entry.kind, entry.leg_key, entry.causation_id, entry.from_owner, entry.to_owner, entry.amount
        );
        Ok(entry.clone())
    }

    /// Every entry written for `causation_id`, in application order
    pub async fn entries_for(&self, causation_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.ledger_repository.entries_for_causation(causation_id).await?)
    }

    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        query: LedgerListQuery,
    ) -> Result<LedgerListResult, LedgerError> {
        let limit = self.paging.clamp(query.limit);

        // One extra row tells us whether another page exists
        let mut entries = self
            .ledger_repository
            .list_entries_for_owner(owner_id, limit + 1, query.after.as_deref())
            .await?;

        let has_more = entries.len() > limit as usize;
        if has_more {
            entries.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            entries.last().map(|entry| entry.id.clone())
        } else {
            None
        };

        Ok(LedgerListResult {
            entries,
            pagination: PaginationInfo {
                has_more,
                next_cursor,
            },
        })
    }

    /// Check that opening balance plus ledger flow explains the stored balance
    pub async fn reconcile(&self, owner_id: &str) -> Result<ReconciliationReport, LedgerError> {
        let ledger_net = self.ledger_repository.net_flow_for_owner(owner_id).await?;
        let (opening_balance, balance) = match self.wallet_repository.get_wallet(owner_id).await? {
            Some(wallet) => (wallet.opening_balance, wallet.balance),
            None => (0, 0),
        };

        let balanced = opening_balance + ledger_net == balance;
        if balanced {
            info!("Wallet {} reconciles at {}", owner_id, balance);
        } else {
            warn!(
                "Wallet {} does not reconcile: opening {} + ledger {} != balance {}",
                owner_id, opening_balance, ledger_net, balance
            );
        }

        Ok(ReconciliationReport {
            owner_id: owner_id.to_string(),
            opening_balance,
            ledger_net,
            balance,
            balanced,
        })
    }
}
