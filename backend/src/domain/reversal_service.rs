//! Reversal engine: all-or-nothing refunds.
//!
//! A reversal inverts every settlement leg (payee shares and the platform
//! commission) and credits the buyer the full total, or it changes nothing
//! that survives. The order of work:
//!
//! 1. dry-run: every payee must currently hold what it owes
//! 2. debit each payee, each debit written with its `refund` ledger leg
//! 3. credit the buyer, in the same storage step that marks the settlement
//!    `reversed`
//!
//! If step 2 fails for any payee (it spent the money after the dry-run, or
//! storage gave out after retries), the payees already debited are credited
//! back with `adjustment` legs and the settlement returns to `settled`.
//! Attempts are numbered so the leg keys of a compensated attempt never
//! collide with a later retry. If the compensation itself cannot be written
//! the settlement stays `reversing`; the next call to `reverse` finishes the
//! rollback if any `adjustment` leg landed, and otherwise carries the
//! refund forward.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::domain::commands::settlement::ReversalReceipt;
use crate::domain::errors::{ReversalError, WalletError};
use crate::domain::models::ledger::{leg_keys, LedgerEntry, LedgerEntryKind};
use crate::domain::models::settlement::{SettlementRecord, SettlementStatus};
use crate::domain::wallet_service::WalletService;
use crate::storage::{Connection, LedgerStorage, LegOutcome, SettlementStorage};

#[derive(Clone)]
pub struct ReversalService<C: Connection> {
    settlement_repository: C::SettlementRepository,
    ledger_repository: C::LedgerRepository,
    wallet_service: WalletService<C>,
    retry: RetryPolicy,
}

/// A settlement leg paired with the refund leg that inverts it
struct RefundLeg {
    index: usize,
    refund: LedgerEntry,
}

impl<C: Connection> ReversalService<C> {
    pub fn new(connection: Arc<C>, wallet_service: WalletService<C>, retry: RetryPolicy) -> Self {
        Self {
            settlement_repository: connection.create_settlement_repository(),
            ledger_repository: connection.create_ledger_repository(),
            wallet_service,
            retry,
        }
    }

    /// Refund everything settled under `causation_id`, or nothing.
    pub async fn reverse(&self, causation_id: &str) -> Result<ReversalReceipt, ReversalError> {
        let record = self
            .settlement_repository
            .get_settlement(causation_id)
            .await?
            .ok_or_else(|| ReversalError::SettlementNotFound(causation_id.to_string()))?;

        match record.status {
            SettlementStatus::Reversed => {
                debug!("Settlement {} already reversed", causation_id);
                return Ok(ReversalReceipt {
                    causation_id: causation_id.to_string(),
                    refunded_amount: record.total_amount,
                    buyer_balance: None,
                    replayed: true,
                });
            }
            SettlementStatus::Debited => {
                return Err(ReversalError::NotSettled {
                    causation_id: causation_id.to_string(),
                    status: record.status,
                });
            }
            SettlementStatus::Settled | SettlementStatus::Reversing => {}
        }

        let entries = self.ledger_repository.entries_for_causation(causation_id).await?;
        let settlement_legs: Vec<&LedgerEntry> = entries
            .iter()
            .filter(|entry| entry.kind.is_settlement_leg())
            .collect();
        if settlement_legs.is_empty() {
            return Err(ReversalError::NoLegs(causation_id.to_string()));
        }
        let refund_total: i64 = settlement_legs.iter().map(|entry| entry.amount).sum();
        if refund_total != record.total_amount {
            error!(
                "Settlement {} legs sum to {} but the buyer paid {}",
                causation_id, refund_total, record.total_amount
            );
            return Err(ReversalError::Conflict(causation_id.to_string()));
        }

        let attempt = self
            .settlement_repository
            .begin_reversal(causation_id)
            .await?
            .ok_or_else(|| ReversalError::Conflict(causation_id.to_string()))?;
        info!(
            "Reversing settlement {} for {} (attempt {}, {} legs, {} total)",
            record.id,
            causation_id,
            attempt,
            settlement_legs.len(),
            refund_total
        );

        let recorded: HashSet<&str> = entries.iter().map(|entry| entry.leg_key.as_str()).collect();
        let legs: Vec<RefundLeg> = settlement_legs
            .iter()
            .enumerate()
            .map(|(index, leg)| RefundLeg {
                index,
                refund: LedgerEntry::new(
                    causation_id,
                    leg_keys::refund(attempt, index),
                    &leg.to_owner,
                    &record.buyer_id,
                    leg.amount,
                    LedgerEntryKind::Refund,
                    leg.commission_bps,
                ),
            })
            .collect();

        // A rollback of this attempt was cut short; finish it rather than going forward
        if legs
            .iter()
            .any(|leg| recorded.contains(leg_keys::compensation(attempt, leg.index).as_str()))
        {
            warn!("Resuming interrupted rollback of attempt {} for {}", attempt, causation_id);
            self.roll_back(&record, attempt, &legs).await?;
            return Err(ReversalError::RolledBack(causation_id.to_string()));
        }

        let pending: Vec<&RefundLeg> = legs
            .iter()
            .filter(|leg| !recorded.contains(leg.refund.leg_key.as_str()))
            .collect();

        if let Err(err) = self.check_payees_can_refund(&pending).await {
            self.roll_back(&record, attempt, &legs).await?;
            return Err(err);
        }

        for leg in pending {
            let err = match self.debit_with_retry(&leg.refund).await {
                Ok(LegOutcome::Applied { new_balance }) => {
                    debug!(
                        "Refund leg {} of {}: debited {} from {}, balance {}",
                        leg.refund.leg_key, causation_id, leg.refund.amount, leg.refund.from_owner, new_balance
                    );
                    continue;
                }
                Ok(LegOutcome::AlreadyApplied) => continue,
                Ok(LegOutcome::InsufficientFunds { available }) => {
                    warn!(
                        "Payee {} fell short mid-reversal of {}: needs {}, has {}",
                        leg.refund.from_owner, causation_id, leg.refund.amount, available
                    );
                    ReversalError::PartialPayeeShortfall {
                        payee_id: leg.refund.from_owner.clone(),
                        required: leg.refund.amount,
                        available,
                    }
                }
                Ok(LegOutcome::WalletMissing) => ReversalError::WalletNotFound(leg.refund.from_owner.clone()),
                Err(err) => {
                    error!(
                        "Storage failure debiting {} for reversal of {}: {:#}",
                        leg.refund.from_owner, causation_id, err
                    );
                    ReversalError::Storage(err)
                }
            };
            self.roll_back(&record, attempt, &legs).await?;
            return Err(err);
        }

        match self.complete_with_retry(&record).await? {
            Some(buyer_balance) => {
                info!(
                    "Settlement {} reversed: refunded {} to {}, balance {}",
                    causation_id, refund_total, record.buyer_id, buyer_balance
                );
                Ok(ReversalReceipt {
                    causation_id: causation_id.to_string(),
                    refunded_amount: refund_total,
                    buyer_balance: Some(buyer_balance),
                    replayed: false,
                })
            }
            None => {
                // Someone else completed it between our debits and the credit
                match self.settlement_repository.get_settlement(causation_id).await? {
                    Some(current) if current.status == SettlementStatus::Reversed => Ok(ReversalReceipt {
                        causation_id: causation_id.to_string(),
                        refunded_amount: refund_total,
                        buyer_balance: None,
                        replayed: true,
                    }),
                    _ => Err(ReversalError::Conflict(causation_id.to_string())),
                }
            }
        }
    }

    /// Every payee must hold the full amount it owes before anything moves
    async fn check_payees_can_refund(&self, pending: &[&RefundLeg]) -> Result<(), ReversalError> {
        let mut owed: Vec<(&str, i64)> = Vec::new();
        for leg in pending {
            match owed.iter_mut().find(|(payee, _)| *payee == leg.refund.from_owner) {
                Some((_, amount)) => *amount += leg.refund.amount,
                None => owed.push((leg.refund.from_owner.as_str(), leg.refund.amount)),
            }
        }

        for (payee_id, required) in owed {
            let available = match self.wallet_service.get(payee_id).await {
                Ok(wallet) => wallet.balance,
                Err(WalletError::WalletNotFound(_)) => 0,
                Err(err) => return Err(err.into()),
            };
            if available < required {
                warn!(
                    "Reversal blocked: payee {} holds {} but owes {}",
                    payee_id, available, required
                );
                return Err(ReversalError::PartialPayeeShortfall {
                    payee_id: payee_id.to_string(),
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Credit back every payee debited in this attempt and return the
    /// settlement to `settled`. Which payees were debited is read from the
    /// ledger, so a debit whose outcome was lost is still compensated. On
    /// error the settlement stays `reversing` and the next attempt resumes
    /// the rollback.
    async fn roll_back(
        &self,
        record: &SettlementRecord,
        attempt: u32,
        legs: &[RefundLeg],
    ) -> Result<(), ReversalError> {
        let recorded: HashSet<String> = self
            .ledger_repository
            .entries_for_causation(&record.causation_id)
            .await?
            .into_iter()
            .map(|entry| entry.leg_key)
            .collect();

        let mut compensated = 0;
        for leg in legs.iter().filter(|leg| recorded.contains(&leg.refund.leg_key)) {
            let adjustment = LedgerEntry::new(
                &record.causation_id,
                leg_keys::compensation(attempt, leg.index),
                &record.buyer_id,
                &leg.refund.from_owner,
                leg.refund.amount,
                LedgerEntryKind::Adjustment,
                leg.refund.commission_bps,
            );
            if let Err(err) = self.compensate_with_retry(&adjustment).await {
                error!(
                    "Could not return {} to {} while rolling back reversal of {}; left in reversing: {:#}",
                    adjustment.amount, adjustment.to_owner, record.causation_id, err
                );
                return Err(ReversalError::Storage(err));
            }
            debug!(
                "Compensated {} to {} for {}",
                adjustment.amount, adjustment.to_owner, record.causation_id
            );
            compensated += 1;
        }

        if !self.settlement_repository.abort_reversal(&record.causation_id).await? {
            warn!(
                "Settlement {} was not reversing when rolling back",
                record.causation_id
            );
        }
        info!(
            "Reversal attempt {} for {} rolled back ({} payees compensated)",
            attempt, record.causation_id, compensated
        );
        Ok(())
    }

    async fn debit_with_retry(&self, refund: &LedgerEntry) -> anyhow::Result<LegOutcome> {
        let mut attempt = 1;
        loop {
            match self.settlement_repository.apply_debit_leg(refund).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        "Debiting {} for {} failed (attempt {}): {}",
                        refund.from_owner, refund.causation_id, attempt, err
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn compensate_with_retry(&self, adjustment: &LedgerEntry) -> anyhow::Result<LegOutcome> {
        let opening_balance = self.wallet_service.opening_balance_for(&adjustment.to_owner);
        let mut attempt = 1;
        loop {
            match self
                .settlement_repository
                .apply_credit_leg(adjustment, opening_balance)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        "Returning {} to {} failed (attempt {}): {}",
                        adjustment.amount, adjustment.to_owner, attempt, err
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_with_retry(&self, record: &SettlementRecord) -> Result<Option<i64>, ReversalError> {
        let mut attempt = 1;
        loop {
            match self
                .settlement_repository
                .complete_reversal(&record.causation_id, &record.buyer_id, record.total_amount)
                .await
            {
                Ok(balance) => return Ok(balance),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        "Crediting buyer {} for reversal of {} failed (attempt {}): {}",
                        record.buyer_id, record.causation_id, attempt, err
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "Buyer credit for reversal of {} failed; left in reversing: {:#}",
                        record.causation_id, err
                    );
                    return Err(ReversalError::Storage(err));
                }
            }
        }
    }
}
