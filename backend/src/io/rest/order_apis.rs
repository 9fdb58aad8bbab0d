//! # REST API for Orders
//!
//! Listing, payment retries, cancellation with refund, and fulfillment
//! updates by the payee.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use shared::{CancelOrderResponse, CheckoutResponse, Order, OrderListResponse, UpdateOrderStatusRequest};
use tracing::{error, info};

use crate::domain::commands::orders::{OrderListQuery, UpdateFulfillmentCommand};
use crate::domain::models::order::OrderStatus;
use crate::io::rest::checkout_apis::created;
use crate::io::rest::mappers::order_mapper::OrderMapper;
use crate::io::rest::{ApiError, AuthenticatedUser};
use crate::AppState;

/// Create a router for order related APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:order_id", get(get_order))
        .route("/:order_id/pay", post(pay_order))
        .route("/:order_id/cancel", post(cancel_order))
        .route("/:order_id/status", put(update_order_status))
}

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

/// Orders the caller bought or is being paid for
pub async fn list_orders(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(params): Query<OrderListParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    info!("GET /api/orders - user: {}, params: {:?}", user_id, params);

    let query = OrderListQuery {
        after: params.after,
        limit: params.limit,
    };
    let result = state.order_service.list_orders(&user_id, query).await?;
    Ok(Json(OrderMapper::to_list_response(result)))
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    info!("GET /api/orders/{} - user: {}", order_id, user_id);

    let order = state.order_service.get_order(&order_id, &user_id).await?;
    Ok(Json(OrderMapper::to_dto(order)))
}

/// Retry a failed payment
pub async fn pay_order(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(order_id): Path<String>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    info!("POST /api/orders/{}/pay - user: {}", order_id, user_id);

    let result = state.order_service.pay_order(&order_id, &user_id).await?;
    let (_, body) = created(&state, result).await?;
    Ok((StatusCode::OK, body))
}

/// Cancel an order; paid orders are refunded in full or not at all
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(order_id): Path<String>,
) -> Result<Json<CancelOrderResponse>, ApiError> {
    info!("POST /api/orders/{}/cancel - user: {}", order_id, user_id);

    match state.order_service.cancel_order(&order_id, &user_id).await {
        Ok(order) => Ok(Json(OrderMapper::to_cancel_response(order))),
        Err(e) => {
            error!("Failed to cancel order {}: {}", order_id, e);
            Err(e.into())
        }
    }
}

pub async fn update_order_status(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(order_id): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    info!(
        "PUT /api/orders/{}/status - user: {}, status: {}",
        order_id, user_id, request.status
    );

    let status = request
        .status
        .parse::<OrderStatus>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let command = UpdateFulfillmentCommand {
        order_id,
        actor_id: user_id,
        status,
    };
    let order = state.order_service.update_fulfillment_status(command).await?;
    Ok(Json(OrderMapper::to_dto(order)))
}
