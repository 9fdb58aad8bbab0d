//! Settlement engine.
//!
//! Turns a validated plan into money movement:
//!
//! 1. claim the causation id and debit the buyer the full total, atomically
//! 2. credit each payee leg, each together with its ledger entry
//! 3. mark the settlement `settled`
//!
//! Step 1 is the gate: if the buyer cannot cover the total nothing happens
//! at all. After it succeeds the buyer debit is never undone here; a credit
//! that keeps failing leaves the record in `debited` so `resume` (or the
//! startup recovery sweep) can finish the remaining legs. Every leg is keyed
//! by `(causation_id, leg_key)`, so re-running any step is harmless.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::domain::commands::settlement::SettlementReceipt;
use crate::domain::commission::{CommissionPolicy, SettlementContext};
use crate::domain::errors::SettlementError;
use crate::domain::models::ledger::{leg_keys, LedgerEntry};
use crate::domain::models::order::{OrderKind, OrderLine};
use crate::domain::models::settlement::{SettlementPlan, SettlementRecord, SettlementStatus};
use crate::domain::wallet_service::WalletService;
use crate::storage::{Connection, LegOutcome, OpenSettlement, SettlementStorage};

#[derive(Clone)]
pub struct SettlementService<C: Connection> {
    settlement_repository: C::SettlementRepository,
    wallet_service: WalletService<C>,
    commission_policy: Arc<dyn CommissionPolicy>,
    retry: RetryPolicy,
}

impl<C: Connection> SettlementService<C> {
    pub fn new(
        connection: Arc<C>,
        wallet_service: WalletService<C>,
        commission_policy: Arc<dyn CommissionPolicy>,
        retry: RetryPolicy,
    ) -> Self {
        let settlement_repository = connection.create_settlement_repository();
        Self {
            settlement_repository,
            wallet_service,
            commission_policy,
            retry,
        }
    }

    /// Price `lines` for `buyer_id` under the commission rate for `kind`
    pub fn plan(
        &self,
        buyer_id: &str,
        kind: OrderKind,
        lines: &[OrderLine],
    ) -> Result<SettlementPlan, SettlementError> {
        let mut payee_ids: Vec<String> = Vec::new();
        for line in lines {
            if !payee_ids.contains(&line.payee_id) {
                payee_ids.push(line.payee_id.clone());
            }
        }
        let rate = self
            .commission_policy
            .rate_for(&SettlementContext::new(kind, payee_ids));
        let platform_id = &self.wallet_service.policy().platform_wallet_id;

        SettlementPlan::build(buyer_id, kind, lines, rate, platform_id).map_err(SettlementError::InvalidPlan)
    }

    /// Settle `plan` under `causation_id`. Safe to call again with the same id.
    pub async fn settle(
        &self,
        causation_id: &str,
        plan: &SettlementPlan,
    ) -> Result<SettlementReceipt, SettlementError> {
        if let Err(reason) = plan.validate() {
            error!("Refusing settlement {}: invalid plan: {}", causation_id, reason);
            return Err(SettlementError::InvalidPlan(reason));
        }

        self.wallet_service.get_or_create(&plan.buyer_id).await?;

        let record = SettlementRecord::from_plan(plan, causation_id);
        match self.settlement_repository.open_settlement(&record).await? {
            OpenSettlement::Opened { new_balance } => {
                info!(
                    "Settlement {} for {}: debited {} from {} ({} legs, {} bps)",
                    record.id,
                    causation_id,
                    plan.total_amount,
                    plan.buyer_id,
                    plan.legs.len(),
                    plan.commission_bps
                );
                let legs_applied = self.apply_credits(&record).await?;
                self.mark_settled(&record).await?;
                Ok(SettlementReceipt {
                    settlement_ref: record.id,
                    causation_id: causation_id.to_string(),
                    buyer_balance: Some(new_balance),
                    legs_applied,
                    replayed: false,
                })
            }
            OpenSettlement::AlreadyOpened(existing) => {
                if existing.total_amount != plan.total_amount || existing.buyer_id != plan.buyer_id {
                    warn!(
                        "Replay of {} does not match the stored settlement; using the stored plan",
                        causation_id
                    );
                }
                self.finish(existing).await
            }
            OpenSettlement::InsufficientFunds { available } => {
                info!(
                    "Settlement {} declined: {} needs {} but has {}",
                    causation_id, plan.buyer_id, plan.total_amount, available
                );
                Err(SettlementError::InsufficientFunds {
                    required: plan.total_amount,
                    available,
                })
            }
            OpenSettlement::WalletMissing => Err(SettlementError::WalletNotFound(plan.buyer_id.clone())),
        }
    }

    /// Re-apply whatever credit legs are missing for a settlement stuck in `debited`
    pub async fn resume(&self, causation_id: &str) -> Result<SettlementReceipt, SettlementError> {
        let record = self
            .settlement_repository
            .get_settlement(causation_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(causation_id.to_string()))?;
        self.finish(record).await
    }

    pub async fn get(&self, causation_id: &str) -> Result<Option<SettlementRecord>, SettlementError> {
        Ok(self.settlement_repository.get_settlement(causation_id).await?)
    }

    /// Settlements whose buyer was debited but whose credits are not all in
    pub async fn incomplete(&self) -> Result<Vec<SettlementRecord>, SettlementError> {
        Ok(self
            .settlement_repository
            .list_settlements_by_status(SettlementStatus::Debited)
            .await?)
    }

    async fn finish(&self, record: SettlementRecord) -> Result<SettlementReceipt, SettlementError> {
        let legs_applied = if record.status == SettlementStatus::Debited {
            info!("Resuming credits for settlement {} ({})", record.id, record.causation_id);
            let applied = self.apply_credits(&record).await?;
            self.mark_settled(&record).await?;
            applied
        } else {
            debug!(
                "Settlement {} already {}, nothing to do",
                record.causation_id, record.status
            );
            0
        };

        Ok(SettlementReceipt {
            settlement_ref: record.id,
            causation_id: record.causation_id,
            buyer_balance: None,
            legs_applied,
            replayed: true,
        })
    }

    async fn apply_credits(&self, record: &SettlementRecord) -> Result<usize, SettlementError> {
        let mut applied = 0;
        for (index, leg) in record.legs.iter().enumerate() {
            let entry = LedgerEntry::new(
                &record.causation_id,
                leg_keys::settlement(index),
                &leg.payer,
                &leg.payee,
                leg.amount,
                leg.kind,
                record.commission_bps,
            );

            let outcome = match self.credit_with_retry(&entry).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    error!(
                        "Credit leg {} of {} to {} failed after {} attempts: {:#}",
                        entry.leg_key, record.causation_id, leg.payee, self.retry.max_attempts, source
                    );
                    return Err(SettlementError::CreditIncomplete {
                        causation_id: record.causation_id.clone(),
                        leg_key: entry.leg_key,
                        source,
                    });
                }
            };

            match outcome {
                LegOutcome::Applied { new_balance } => {
                    debug!(
                        "Leg {} of {}: {} -> {} {} ({}), payee balance {}",
                        entry.leg_key, record.causation_id, leg.payer, leg.payee, leg.amount, leg.kind, new_balance
                    );
                    applied += 1;
                }
                LegOutcome::AlreadyApplied => {
                    debug!("Leg {} of {} already applied", entry.leg_key, record.causation_id);
                }
                LegOutcome::InsufficientFunds { .. } | LegOutcome::WalletMissing => {
                    error!(
                        "Credit leg {} of {} could not be applied to {}",
                        entry.leg_key, record.causation_id, leg.payee
                    );
                    return Err(SettlementError::CreditIncomplete {
                        causation_id: record.causation_id.clone(),
                        leg_key: entry.leg_key,
                        source: anyhow::anyhow!("Payee wallet {} unavailable", leg.payee),
                    });
                }
            }
        }
        Ok(applied)
    }

    async fn credit_with_retry(&self, entry: &LedgerEntry) -> anyhow::Result<LegOutcome> {
        let opening_balance = self.wallet_service.opening_balance_for(&entry.to_owner);
        let mut attempt = 1;
        loop {
            match self
                .settlement_repository
                .apply_credit_leg(entry, opening_balance)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        "Credit leg {} of {} failed (attempt {}/{}): {}",
                        entry.leg_key, entry.causation_id, attempt, self.retry.max_attempts, err
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn mark_settled(&self, record: &SettlementRecord) -> Result<(), SettlementError> {
        let moved = self
            .settlement_repository
            .transition_settlement(&record.causation_id, SettlementStatus::Debited, SettlementStatus::Settled)
            .await?;
        if moved {
            info!("Settlement {} for {} settled", record.id, record.causation_id);
        } else {
            // A concurrent resume got there first
            debug!("Settlement {} was no longer debited", record.causation_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletPolicy;
    use crate::domain::commission::{CommissionRate, FlatCommissionPolicy};
    use crate::domain::models::ledger::LedgerEntryKind;
    use crate::storage::{LedgerStorage, MemoryConnection, WalletStorage};
    use std::time::Duration;

    fn create_test_service(bps: u32) -> (SettlementService<MemoryConnection>, Arc<MemoryConnection>) {
        let connection = Arc::new(MemoryConnection::new());
        let wallet_service = WalletService::new(connection.clone(), WalletPolicy::default());
        let policy = Arc::new(FlatCommissionPolicy(CommissionRate::from_bps(bps).unwrap()));
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let service = SettlementService::new(connection.clone(), wallet_service, policy, retry);
        (service, connection)
    }

    fn line(payee: &str, price: i64) -> OrderLine {
        OrderLine {
            payee_id: payee.to_string(),
            description: "kibble".to_string(),
            unit_price: price,
            quantity: 1,
        }
    }

    async fn balance(connection: &MemoryConnection, owner: &str) -> i64 {
        connection
            .create_wallet_repository()
            .get_wallet(owner)
            .await
            .unwrap()
            .map_or(0, |w| w.balance)
    }

    #[tokio::test]
    async fn test_settle_moves_money_and_writes_legs() {
        let (service, connection) = create_test_service(1_000);
        let plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();

        let receipt = service.settle("ord_1", &plan).await.unwrap();
        assert_eq!(receipt.buyer_balance, Some(9_000));
        assert_eq!(receipt.legs_applied, 2);
        assert!(!receipt.replayed);

        assert_eq!(balance(&connection, "buyer").await, 9_000);
        assert_eq!(balance(&connection, "seller").await, 10_900);
        assert_eq!(balance(&connection, "platform").await, 100);

        let entries = connection.create_ledger_repository().entries_for_causation("ord_1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, LedgerEntryKind::Commission);
        assert!(entries.iter().all(|e| e.commission_bps == 1_000));

        let record = service.get("ord_1").await.unwrap().unwrap();
        assert_eq!(record.status, SettlementStatus::Settled);
        assert_eq!(record.id, receipt.settlement_ref);
    }

    #[tokio::test]
    async fn test_replay_returns_existing_reference_without_moving_money() {
        let (service, connection) = create_test_service(1_000);
        let plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();

        let first = service.settle("ord_1", &plan).await.unwrap();
        let second = service.settle("ord_1", &plan).await.unwrap();

        assert!(second.replayed);
        assert_eq!(second.settlement_ref, first.settlement_ref);
        assert_eq!(second.legs_applied, 0);
        assert_eq!(balance(&connection, "buyer").await, 9_000);
        assert_eq!(
            connection.create_ledger_repository().entries_for_causation("ord_1").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let (service, connection) = create_test_service(1_000);
        connection.set_balance("buyer", 500);
        let plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();

        let err = service.settle("ord_1", &plan).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InsufficientFunds {
                required: 1_000,
                available: 500
            }
        ));
        assert_eq!(balance(&connection, "buyer").await, 500);
        assert!(service.get("ord_1").await.unwrap().is_none());
        assert!(connection
            .create_ledger_repository()
            .entries_for_causation("ord_1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_transient_credit_fault_is_retried() {
        let (service, connection) = create_test_service(1_000);
        connection.inject_credit_faults(2);
        let plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();

        let receipt = service.settle("ord_1", &plan).await.unwrap();
        assert_eq!(receipt.legs_applied, 2);
        assert_eq!(balance(&connection, "seller").await, 10_900);
    }

    #[tokio::test]
    async fn test_persistent_credit_fault_leaves_settlement_for_resume() {
        let (service, connection) = create_test_service(1_000);
        connection.inject_credit_faults(3);
        let plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();

        let err = service.settle("ord_1", &plan).await.unwrap_err();
        assert!(matches!(err, SettlementError::CreditIncomplete { .. }));

        // Buyer stays debited, nothing was handed back
        assert_eq!(balance(&connection, "buyer").await, 9_000);
        let record = service.get("ord_1").await.unwrap().unwrap();
        assert_eq!(record.status, SettlementStatus::Debited);
        assert_eq!(service.incomplete().await.unwrap().len(), 1);

        let receipt = service.resume("ord_1").await.unwrap();
        assert_eq!(receipt.legs_applied, 2);
        assert_eq!(balance(&connection, "seller").await, 10_900);
        assert_eq!(balance(&connection, "platform").await, 100);
        assert_eq!(
            service.get("ord_1").await.unwrap().unwrap().status,
            SettlementStatus::Settled
        );
    }

    #[tokio::test]
    async fn test_invalid_plan_is_refused_before_any_debit() {
        let (service, connection) = create_test_service(1_000);
        let mut plan = service.plan("buyer", OrderKind::Product, &[line("seller", 1_000)]).unwrap();
        plan.legs[0].amount += 1;

        let err = service.settle("ord_1", &plan).await.unwrap_err();
        assert!(matches!(err, SettlementError::InvalidPlan(_)));
        assert_eq!(balance(&connection, "buyer").await, 0);
    }

    #[tokio::test]
    async fn test_resume_unknown_causation() {
        let (service, _) = create_test_service(1_000);
        assert!(matches!(
            service.resume("nope").await,
            Err(SettlementError::NotFound(_))
        ));
    }
}
