//! # REST API Interface Layer
//!
//! HTTP endpoints for wallets, checkout and orders. All routes are nested
//! under `/api` and require the caller's id in the `X-User-Id` header,
//! which the identity module in front of this service sets.
//!
//! ## Endpoints
//!
//! - `GET  /wallet`, `/wallet/transactions`, `/wallet/reconciliation`
//! - `POST /checkout`, `/bookings`, `/events/{eventId}/registrations`
//! - `GET  /orders`, `/orders/{id}`
//! - `POST /orders/{id}/pay`, `/orders/{id}/cancel`
//! - `PUT  /orders/{id}/status`

pub mod checkout_apis;
pub mod error;
pub mod extractors;
pub mod mappers;
pub mod order_apis;
pub mod wallet_apis;

use axum::Router;

use crate::AppState;

pub use error::ApiError;
pub use extractors::{AuthenticatedUser, USER_ID_HEADER};

/// Every API route, ready to be nested under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/wallet", wallet_apis::router())
        .nest("/orders", order_apis::router())
        .merge(checkout_apis::router())
}
