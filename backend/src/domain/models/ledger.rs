use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    OrderPayment,
    ServicePayment,
    EventPayment,
    Commission,
    Refund,
    Adjustment,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::OrderPayment => "order_payment",
            LedgerEntryKind::ServicePayment => "service_payment",
            LedgerEntryKind::EventPayment => "event_payment",
            LedgerEntryKind::Commission => "commission",
            LedgerEntryKind::Refund => "refund",
            LedgerEntryKind::Adjustment => "adjustment",
        }
    }

    /// True for the legs a settlement writes (the ones a reversal inverts)
    pub fn is_settlement_leg(&self) -> bool {
        matches!(
            self,
            LedgerEntryKind::OrderPayment
                | LedgerEntryKind::ServicePayment
                | LedgerEntryKind::EventPayment
                | LedgerEntryKind::Commission
        )
    }
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_payment" => Ok(LedgerEntryKind::OrderPayment),
            "service_payment" => Ok(LedgerEntryKind::ServicePayment),
            "event_payment" => Ok(LedgerEntryKind::EventPayment),
            "commission" => Ok(LedgerEntryKind::Commission),
            "refund" => Ok(LedgerEntryKind::Refund),
            "adjustment" => Ok(LedgerEntryKind::Adjustment),
            other => Err(anyhow::anyhow!("Unknown ledger entry kind: {}", other)),
        }
    }
}

/// One immutable money movement.
///
/// `(causation_id, leg_key)` identifies the leg; storage refuses a second
/// entry with the same pair, which is what makes re-running a settlement or
/// reversal step harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub causation_id: String,
    pub leg_key: String,
    pub from_owner: String,
    pub to_owner: String,
    pub amount: i64,
    pub kind: LedgerEntryKind,
    pub commission_bps: u32,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        causation_id: &str,
        leg_key: String,
        from_owner: &str,
        to_owner: &str,
        amount: i64,
        kind: LedgerEntryKind,
        commission_bps: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            causation_id: causation_id.to_string(),
            leg_key,
            from_owner: from_owner.to_string(),
            to_owner: to_owner.to_string(),
            amount,
            kind,
            commission_bps,
            created_at: Utc::now(),
        }
    }

    /// Signed effect of this entry on `owner_id`'s balance
    pub fn net_for(&self, owner_id: &str) -> i64 {
        let mut net = 0;
        if self.to_owner == owner_id {
            net += self.amount;
        }
        if self.from_owner == owner_id {
            net -= self.amount;
        }
        net
    }

    pub fn touches(&self, owner_id: &str) -> bool {
        self.from_owner == owner_id || self.to_owner == owner_id
    }
}

/// Leg identities within one causation id
pub mod leg_keys {
    pub fn settlement(index: usize) -> String {
        format!("settle:{}", index)
    }

    pub fn refund(attempt: u32, index: usize) -> String {
        format!("refund:{}:{}", attempt, index)
    }

    pub fn compensation(attempt: u32, index: usize) -> String {
        format!("compensate:{}:{}", attempt, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            LedgerEntryKind::OrderPayment,
            LedgerEntryKind::ServicePayment,
            LedgerEntryKind::EventPayment,
            LedgerEntryKind::Commission,
            LedgerEntryKind::Refund,
            LedgerEntryKind::Adjustment,
        ] {
            assert_eq!(kind.as_str().parse::<LedgerEntryKind>().unwrap(), kind);
        }
        assert!("wire_transfer".parse::<LedgerEntryKind>().is_err());
    }

    #[test]
    fn test_net_for_each_side() {
        let entry = LedgerEntry::new(
            "order-1",
            leg_keys::settlement(0),
            "buyer",
            "seller",
            900,
            LedgerEntryKind::OrderPayment,
            1_000,
        );
        assert_eq!(entry.net_for("buyer"), -900);
        assert_eq!(entry.net_for("seller"), 900);
        assert_eq!(entry.net_for("platform"), 0);
        assert!(!entry.touches("platform"));
    }

    #[test]
    fn test_refund_keys_are_scoped_by_attempt() {
        assert_ne!(leg_keys::refund(1, 0), leg_keys::refund(2, 0));
        assert_eq!(leg_keys::settlement(3), "settle:3");
    }
}
