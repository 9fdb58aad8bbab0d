use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::models::ledger::LedgerEntryKind;

/// The three contexts that share the order shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Product,
    ServiceBooking,
    EventRegistration,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Product => "product",
            OrderKind::ServiceBooking => "service_booking",
            OrderKind::EventRegistration => "event_registration",
        }
    }

    /// Ledger kind used for the payee legs of this context
    pub fn payment_entry_kind(&self) -> LedgerEntryKind {
        match self {
            OrderKind::Product => LedgerEntryKind::OrderPayment,
            OrderKind::ServiceBooking => LedgerEntryKind::ServicePayment,
            OrderKind::EventRegistration => LedgerEntryKind::EventPayment,
        }
    }

    /// Fulfillment status an order enters once its payment settles
    pub fn paid_status(&self) -> OrderStatus {
        match self {
            OrderKind::Product => OrderStatus::Processing,
            OrderKind::ServiceBooking | OrderKind::EventRegistration => OrderStatus::Confirmed,
        }
    }
}

impl FromStr for OrderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(OrderKind::Product),
            "service_booking" => Ok(OrderKind::ServiceBooking),
            "event_registration" => Ok(OrderKind::EventRegistration),
            other => Err(anyhow::anyhow!("Unknown order kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Confirmed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses from which a cancellation may be requested
    pub const CANCELLABLE: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
    ];

    pub fn is_cancellable(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    /// Forward fulfillment moves a payee may make on a paid order
    pub fn can_advance_to(&self, next: OrderStatus, kind: OrderKind) -> bool {
        match kind {
            OrderKind::Product => matches!(
                (self, next),
                (OrderStatus::Processing, OrderStatus::Shipped)
                    | (OrderStatus::Shipped, OrderStatus::Delivered)
            ),
            OrderKind::ServiceBooking | OrderKind::EventRegistration => {
                matches!((self, next), (OrderStatus::Confirmed, OrderStatus::Completed))
            }
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(anyhow::anyhow!("Unknown order status: {}", other)),
        }
    }
}

/// `Processing` and `Refunding` mark a settlement or reversal in flight;
/// they double as the mutual-exclusion gate for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
    Refunding,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunding => "refunding",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "paid" => Ok(PaymentStatus::Paid),
            "refunding" => Ok(PaymentStatus::Refunding),
            "refunded" => Ok(PaymentStatus::Refunded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub payee_id: String,
    pub description: String,
    pub unit_price: i64,
    pub quantity: u32,
}

impl OrderLine {
    /// `None` on overflow
    pub fn line_amount(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub kind: OrderKind,
    pub buyer_id: String,
    pub lines: Vec<OrderLine>,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub settlement_ref: Option<String>,
    /// Slot id for bookings, event id for registrations
    pub reference: Option<String>,
    pub shipping_address: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn generate_id(kind: OrderKind) -> String {
        let prefix = match kind {
            OrderKind::Product => "ord",
            OrderKind::ServiceBooking => "bkg",
            OrderKind::EventRegistration => "evt",
        };
        format!("{}_{}", prefix, Uuid::new_v4().simple())
    }

    pub fn is_payee(&self, user_id: &str) -> bool {
        self.lines.iter().any(|line| line.payee_id == user_id)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.is_payee(user_id)
    }
}

/// Preconditions for a conditional order update. Empty lists match anything.
#[derive(Debug, Clone, Default)]
pub struct OrderGuard {
    pub statuses: Vec<OrderStatus>,
    pub payment_statuses: Vec<PaymentStatus>,
}

impl OrderGuard {
    pub fn payment(payment_statuses: &[PaymentStatus]) -> Self {
        Self {
            statuses: Vec::new(),
            payment_statuses: payment_statuses.to_vec(),
        }
    }

    pub fn with_statuses(mut self, statuses: &[OrderStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && (self.payment_statuses.is_empty()
                || self.payment_statuses.contains(&order.payment_status))
    }
}

/// Fields a conditional order update writes. `None` leaves a field alone;
/// `failure_reason: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct OrderChange {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub settlement_ref: Option<String>,
    pub failure_reason: Option<Option<String>>,
}

impl OrderChange {
    pub fn payment(payment_status: PaymentStatus) -> Self {
        Self {
            payment_status: Some(payment_status),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn settlement_ref(mut self, settlement_ref: String) -> Self {
        self.settlement_ref = Some(settlement_ref);
        self
    }

    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(Some(reason.into()));
        self
    }

    pub fn clear_failure(mut self) -> Self {
        self.failure_reason = Some(None);
        self
    }

    pub fn apply_to(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            order.payment_status = payment_status;
        }
        if let Some(settlement_ref) = &self.settlement_ref {
            order.settlement_ref = Some(settlement_ref.clone());
        }
        if let Some(reason) = &self.failure_reason {
            order.failure_reason = reason.clone();
        }
        order.updated_at = Utc::now();
    }
}
