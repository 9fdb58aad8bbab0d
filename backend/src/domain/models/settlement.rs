use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::commission::CommissionRate;
use crate::domain::models::ledger::LedgerEntryKind;
use crate::domain::models::order::{OrderKind, OrderLine};

/// One money movement a settlement will make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementLeg {
    pub payer: String,
    pub payee: String,
    pub amount: i64,
    pub kind: LedgerEntryKind,
}

/// The legs for one priced transaction, computed once and never persisted
/// on its own (the settlement record keeps a copy for recovery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub buyer_id: String,
    pub kind: OrderKind,
    pub total_amount: i64,
    pub commission_bps: u32,
    pub legs: Vec<SettlementLeg>,
}

impl SettlementPlan {
    /// Group `lines` by payee, split each payee's gross with `rate`, and
    /// send the summed commission to `platform_id` as a single leg.
    ///
    /// Fails only on arithmetic overflow.
    pub fn build(
        buyer_id: &str,
        kind: OrderKind,
        lines: &[OrderLine],
        rate: CommissionRate,
        platform_id: &str,
    ) -> Result<Self, String> {
        let mut gross_by_payee: Vec<(String, i64)> = Vec::new();
        let mut total: i64 = 0;

        for line in lines {
            let amount = line
                .line_amount()
                .ok_or_else(|| format!("Line amount overflows for {}", line.description))?;
            total = total
                .checked_add(amount)
                .ok_or_else(|| "Order total overflows".to_string())?;
            match gross_by_payee.iter_mut().find(|(payee, _)| payee == &line.payee_id) {
                Some((_, gross)) => {
                    *gross = gross
                        .checked_add(amount)
                        .ok_or_else(|| "Payee total overflows".to_string())?
                }
                None => gross_by_payee.push((line.payee_id.clone(), amount)),
            }
        }

        let mut legs = Vec::with_capacity(gross_by_payee.len() + 1);
        let mut commission_total: i64 = 0;
        for (payee, gross) in gross_by_payee {
            let (share, commission) = rate.split(gross);
            commission_total += commission;
            if share > 0 {
                legs.push(SettlementLeg {
                    payer: buyer_id.to_string(),
                    payee,
                    amount: share,
                    kind: kind.payment_entry_kind(),
                });
            }
        }
        if commission_total > 0 {
            legs.push(SettlementLeg {
                payer: buyer_id.to_string(),
                payee: platform_id.to_string(),
                amount: commission_total,
                kind: LedgerEntryKind::Commission,
            });
        }

        Ok(Self {
            buyer_id: buyer_id.to_string(),
            kind,
            total_amount: total,
            commission_bps: rate.bps(),
            legs,
        })
    }

    /// Conservation check: everything the buyer pays lands with a payee
    pub fn validate(&self) -> Result<(), String> {
        if self.total_amount <= 0 {
            return Err(format!("Total must be positive, got {}", self.total_amount));
        }
        if self.legs.is_empty() {
            return Err("Plan has no legs".to_string());
        }
        let mut paid_out: i64 = 0;
        for (index, leg) in self.legs.iter().enumerate() {
            if leg.payer != self.buyer_id {
                return Err(format!(
                    "Leg {} is paid by {} instead of buyer {}",
                    index, leg.payer, self.buyer_id
                ));
            }
            if leg.payee == self.buyer_id {
                return Err(format!("Leg {} pays the buyer back", index));
            }
            if leg.amount <= 0 {
                return Err(format!("Leg {} has non-positive amount {}", index, leg.amount));
            }
            if !leg.kind.is_settlement_leg() {
                return Err(format!("Leg {} has kind {} which is not a payment", index, leg.kind));
            }
            paid_out = paid_out
                .checked_add(leg.amount)
                .ok_or_else(|| "Leg sum overflows".to_string())?;
        }
        if paid_out != self.total_amount {
            return Err(format!(
                "Buyer is charged {} but payees receive {}",
                self.total_amount, paid_out
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementStatus {
    /// Buyer debited, some credit legs may still be missing
    Debited,
    Settled,
    /// A reversal attempt is in flight
    Reversing,
    Reversed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Debited => "debited",
            SettlementStatus::Settled => "settled",
            SettlementStatus::Reversing => "reversing",
            SettlementStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debited" => Ok(SettlementStatus::Debited),
            "settled" => Ok(SettlementStatus::Settled),
            "reversing" => Ok(SettlementStatus::Reversing),
            "reversed" => Ok(SettlementStatus::Reversed),
            other => Err(anyhow::anyhow!("Unknown settlement status: {}", other)),
        }
    }
}

/// Durable record of one settlement, keyed by causation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    /// The settlement reference handed back to the order
    pub id: String,
    pub causation_id: String,
    pub buyer_id: String,
    pub kind: OrderKind,
    pub total_amount: i64,
    pub commission_bps: u32,
    pub legs: Vec<SettlementLeg>,
    pub status: SettlementStatus,
    pub reversal_attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    pub fn from_plan(plan: &SettlementPlan, causation_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("stl_{}", Uuid::new_v4().simple()),
            causation_id: causation_id.to_string(),
            buyer_id: plan.buyer_id.clone(),
            kind: plan.kind,
            total_amount: plan.total_amount,
            commission_bps: plan.commission_bps,
            legs: plan.legs.clone(),
            status: SettlementStatus::Debited,
            reversal_attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
