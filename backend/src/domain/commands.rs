//! Domain-level command and query types
//! These structs are used by services inside the domain layer and are **not**
//! exposed over the public API. The REST layer is responsible for mapping the
//! public DTOs defined in the `shared` crate to these internal types.

/// Generic pagination info returned by list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationInfo {
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

pub mod ledger {
    use super::PaginationInfo;
    use crate::domain::models::ledger::LedgerEntry;

    /// Query parameters for listing a wallet's ledger entries.
    #[derive(Debug, Clone, Default)]
    pub struct LedgerListQuery {
        pub after: Option<String>,
        pub limit: Option<u32>,
    }

    /// Result of listing ledger entries.
    #[derive(Debug, Clone)]
    pub struct LedgerListResult {
        pub entries: Vec<LedgerEntry>,
        pub pagination: PaginationInfo,
    }

    /// Opening balance plus recorded flow, compared with the stored balance.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ReconciliationReport {
        pub owner_id: String,
        pub opening_balance: i64,
        pub ledger_net: i64,
        pub balance: i64,
        pub balanced: bool,
    }
}

pub mod settlement {
    /// What `settle` hands back to its caller.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SettlementReceipt {
        pub settlement_ref: String,
        pub causation_id: String,
        /// Buyer balance right after the debit; `None` on a replay
        pub buyer_balance: Option<i64>,
        pub legs_applied: usize,
        /// True if the causation id had already been settled
        pub replayed: bool,
    }

    /// What `reverse` hands back to its caller.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ReversalReceipt {
        pub causation_id: String,
        pub refunded_amount: i64,
        /// Buyer balance after the refund; `None` on a replay
        pub buyer_balance: Option<i64>,
        pub replayed: bool,
    }
}

pub mod orders {
    use super::PaginationInfo;
    use crate::domain::models::order::{Order, OrderKind, OrderLine, OrderStatus};

    /// How the buyer says they are paying. Card and UPI details are only
    /// format-checked; the money always comes out of the wallet.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub enum PaymentMethod {
        #[default]
        Wallet,
        Card {
            number: String,
            expiry: String,
            cvv: String,
            holder: String,
        },
        Upi {
            vpa: String,
        },
    }

    /// Input shared by every way of creating an order.
    #[derive(Debug, Clone)]
    pub struct PlaceOrderCommand {
        pub kind: OrderKind,
        pub buyer_id: String,
        pub lines: Vec<OrderLine>,
        pub reference: Option<String>,
        pub shipping_address: Option<String>,
        pub payment_method: PaymentMethod,
    }

    /// Input for checking out a cart of products.
    #[derive(Debug, Clone)]
    pub struct CheckoutCommand {
        pub buyer_id: String,
        pub items: Vec<OrderLine>,
        pub shipping_address: Option<String>,
        pub payment_method: PaymentMethod,
    }

    /// Input for booking a provider's service slot.
    #[derive(Debug, Clone)]
    pub struct BookServiceCommand {
        pub buyer_id: String,
        pub provider_id: String,
        pub service_name: String,
        pub price: i64,
        pub slot: String,
        pub payment_method: PaymentMethod,
    }

    /// Input for buying tickets to an event.
    #[derive(Debug, Clone)]
    pub struct RegisterForEventCommand {
        pub buyer_id: String,
        pub event_id: String,
        pub organizer_id: String,
        pub title: String,
        pub ticket_price: i64,
        pub attendees: u32,
        pub payment_method: PaymentMethod,
    }

    /// Result of placing or paying an order.
    #[derive(Debug, Clone)]
    pub struct OrderPlacementResult {
        pub order: Order,
        /// Buyer balance after the debit, when the payment settled
        pub new_balance: Option<i64>,
    }

    /// Query parameters for listing orders.
    #[derive(Debug, Clone, Default)]
    pub struct OrderListQuery {
        pub after: Option<String>,
        pub limit: Option<u32>,
    }

    /// Result of listing orders.
    #[derive(Debug, Clone)]
    pub struct OrderListResult {
        pub orders: Vec<Order>,
        pub pagination: PaginationInfo,
    }

    /// Input for a payee moving an order along.
    #[derive(Debug, Clone)]
    pub struct UpdateFulfillmentCommand {
        pub order_id: String,
        pub actor_id: String,
        pub status: OrderStatus,
    }

    /// What the startup sweep did.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct RecoveryReport {
        pub settlements_completed: usize,
        pub orders_marked_paid: usize,
        pub orders_marked_failed: usize,
        pub refunds_completed: usize,
        pub refunds_rolled_back: usize,
        /// Orders that could not be resolved this time
        pub still_in_flight: Vec<String>,
    }
}
