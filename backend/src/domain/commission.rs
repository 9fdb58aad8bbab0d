//! Commission policy.
//!
//! The platform's share of a settlement is decided in exactly one place: a
//! `CommissionPolicy` picks a rate for the settlement context, and
//! `CommissionRate::split` turns a payee's gross amount into the payee share
//! and the commission. The rate that was used travels with every ledger leg,
//! so refunds never need to ask the policy again.

use crate::config::CommissionConfig;
use crate::domain::models::order::OrderKind;

/// Commission expressed in basis points (1/100 of a percent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommissionRate(u32);

impl CommissionRate {
    pub const MAX_BPS: u32 = 10_000;
    pub const ZERO: CommissionRate = CommissionRate(0);

    pub fn from_bps(bps: u32) -> Option<Self> {
        (bps <= Self::MAX_BPS).then_some(Self(bps))
    }

    /// Rates above 100% are capped at 100%
    pub fn saturating_from_bps(bps: u32) -> Self {
        Self(bps.min(Self::MAX_BPS))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    /// Split `gross` into `(payee_share, commission)`.
    ///
    /// The commission is rounded down; the payee gets the remainder, so the
    /// two halves always add back up to `gross`.
    pub fn split(&self, gross: i64) -> (i64, i64) {
        if gross <= 0 {
            return (gross, 0);
        }
        let commission = (i128::from(gross) * i128::from(self.0) / i128::from(Self::MAX_BPS)) as i64;
        (gross - commission, commission)
    }
}

/// What a policy gets to look at when choosing a rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementContext {
    pub kind: OrderKind,
    pub payee_ids: Vec<String>,
}

impl SettlementContext {
    pub fn new(kind: OrderKind, payee_ids: Vec<String>) -> Self {
        Self { kind, payee_ids }
    }
}

pub trait CommissionPolicy: Send + Sync {
    fn rate_for(&self, context: &SettlementContext) -> CommissionRate;
}

/// One configured rate per order kind
#[derive(Debug, Clone, Copy)]
pub struct ContextCommissionPolicy {
    product: CommissionRate,
    service: CommissionRate,
    event: CommissionRate,
}

impl ContextCommissionPolicy {
    pub fn from_config(config: &CommissionConfig) -> Self {
        Self {
            product: CommissionRate::saturating_from_bps(config.product_bps),
            service: CommissionRate::saturating_from_bps(config.service_bps),
            event: CommissionRate::saturating_from_bps(config.event_bps),
        }
    }
}

impl CommissionPolicy for ContextCommissionPolicy {
    fn rate_for(&self, context: &SettlementContext) -> CommissionRate {
        match context.kind {
            OrderKind::Product => self.product,
            OrderKind::ServiceBooking => self.service,
            OrderKind::EventRegistration => self.event,
        }
    }
}

/// The same rate for everything
#[derive(Debug, Clone, Copy)]
pub struct FlatCommissionPolicy(pub CommissionRate);

impl CommissionPolicy for FlatCommissionPolicy {
    fn rate_for(&self, _context: &SettlementContext) -> CommissionRate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_percent_of_one_thousand() {
        let rate = CommissionRate::from_bps(1_000).unwrap();
        assert_eq!(rate.split(1_000), (900, 100));
    }

    #[test]
    fn test_five_percent_of_eleven_eighty() {
        let rate = CommissionRate::from_bps(500).unwrap();
        assert_eq!(rate.split(1_180), (1_121, 59));
    }

    #[test]
    fn test_commission_rounds_down_in_favour_of_payee() {
        let rate = CommissionRate::from_bps(1_000).unwrap();
        // 10% of 999 is 99.9
        assert_eq!(rate.split(999), (900, 99));
    }

    #[test]
    fn test_split_survives_large_amounts() {
        let rate = CommissionRate::from_bps(9_999).unwrap();
        let (share, commission) = rate.split(i64::MAX);
        assert_eq!(share + commission, i64::MAX);
    }

    #[test]
    fn test_rate_bounds() {
        assert!(CommissionRate::from_bps(10_001).is_none());
        assert_eq!(CommissionRate::saturating_from_bps(50_000).bps(), 10_000);
    }

    #[test]
    fn test_context_policy_picks_rate_by_kind() {
        let policy = ContextCommissionPolicy::from_config(&CommissionConfig {
            product_bps: 1_000,
            service_bps: 500,
            event_bps: 250,
        });
        let rate = |kind| policy.rate_for(&SettlementContext::new(kind, vec![])).bps();
        assert_eq!(rate(OrderKind::Product), 1_000);
        assert_eq!(rate(OrderKind::ServiceBooking), 500);
        assert_eq!(rate(OrderKind::EventRegistration), 250);
    }
}
