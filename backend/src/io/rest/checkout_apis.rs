//! # REST API for Checkout
//!
//! Product checkout, service bookings and event registrations. All three
//! create an order and charge the caller's wallet in the same request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use shared::{BookingRequest, CheckoutRequest, CheckoutResponse, EventRegistrationRequest};
use tracing::{info, warn};

use crate::domain::commands::orders::OrderPlacementResult;
use crate::io::rest::mappers::order_mapper::OrderMapper;
use crate::io::rest::{ApiError, AuthenticatedUser};
use crate::AppState;

/// Create a router for checkout related APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/bookings", post(book_service))
        .route("/events/:event_id/registrations", post(register_for_event))
}

pub async fn checkout(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    info!("POST /api/checkout - user: {}, {} items", user_id, request.items.len());

    let command = OrderMapper::to_checkout_command(user_id, request);
    let result = state.order_service.checkout(command).await.map_err(|e| {
        warn!("Checkout failed: {}", e);
        e
    })?;
    created(&state, result).await
}

pub async fn book_service(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    info!(
        "POST /api/bookings - user: {}, provider: {}, slot: {}",
        user_id, request.provider_id, request.slot
    );

    let command = OrderMapper::to_booking_command(user_id, request);
    let result = state.order_service.book_service(command).await.map_err(|e| {
        warn!("Booking failed: {}", e);
        e
    })?;
    created(&state, result).await
}

pub async fn register_for_event(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<String>,
    Json(request): Json<EventRegistrationRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    info!(
        "POST /api/events/{}/registrations - user: {}, attendees: {}",
        event_id, user_id, request.attendees
    );

    let command = OrderMapper::to_registration_command(user_id, event_id, request);
    let result = state.order_service.register_for_event(command).await.map_err(|e| {
        warn!("Event registration failed: {}", e);
        e
    })?;
    created(&state, result).await
}

pub(crate) async fn created(
    state: &AppState,
    result: OrderPlacementResult,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let fallback_balance = match result.new_balance {
        Some(balance) => balance,
        None => state.wallet_service.balance(&result.order.buyer_id).await?,
    };
    Ok((
        StatusCode::CREATED,
        Json(OrderMapper::to_checkout_response(result, fallback_balance)),
    ))
}
