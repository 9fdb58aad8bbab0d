//! Request and response bodies exchanged over the marketplace HTTP API.
//!
//! Amounts are integers in the smallest currency unit. Status fields are the
//! lowercase names used by the backend (`"pending"`, `"paid"`, `"refunded"`, ...).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub owner_id: String,
    pub balance: i64,
}

/// One money movement as shown in a user's transaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: i64,
    /// order_payment, service_payment, event_payment, commission, refund or adjustment
    pub kind: String,
    /// RFC 3339 timestamp
    pub created_at: String,
    pub causation_id: String,
    /// Commission rate (basis points) of the settlement that produced this entry
    pub commission_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPageResponse {
    pub entries: Vec<LedgerEntry>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResponse {
    pub owner_id: String,
    pub opening_balance: i64,
    pub ledger_net: i64,
    pub balance: i64,
    pub balanced: bool,
}

/// A line item priced by the catalog module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    /// The seller who receives this line's share
    pub payee_id: String,
    pub description: String,
    pub unit_price: i64,
    pub quantity: u32,
}

/// How the buyer says they are paying. Only the wallet is ever charged;
/// card and UPI details are checked for format and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Wallet,
    Card {
        number: String,
        /// MM/YY
        expiry: String,
        cvv: String,
        holder: String,
    },
    Upi {
        vpa: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub items: Vec<PricedItem>,
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub provider_id: String,
    pub service_name: String,
    pub price: i64,
    /// Slot identifier handed out by the availability module
    pub slot: String,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistrationRequest {
    pub organizer_id: String,
    pub title: String,
    pub ticket_price: i64,
    pub attendees: u32,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Returned by checkout, booking and event registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: String,
    pub new_balance: i64,
    pub total_amount: i64,
    pub payment_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub payee_id: String,
    pub description: String,
    pub unit_price: i64,
    pub quantity: u32,
    pub line_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    /// product, service_booking or event_registration
    pub kind: String,
    pub buyer_id: String,
    pub lines: Vec<OrderLine>,
    pub total_amount: i64,
    pub status: String,
    pub payment_status: String,
    pub settlement_ref: Option<String>,
    pub reference: Option<String>,
    pub shipping_address: Option<String>,
    /// Set when the last payment or refund attempt failed
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub pagination: PaginationInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub order_id: String,
    pub status: String,
    pub payment_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// Generic error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error body for a rejected wallet charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientFundsResponse {
    pub error: String,
    pub required: i64,
    pub available: i64,
    pub shortfall: i64,
}
