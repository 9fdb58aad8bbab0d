//! # REST API for Wallets
//!
//! The caller's balance, transaction history and a reconciliation check.

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use shared::{LedgerPageResponse, ReconciliationResponse, WalletResponse};
use tracing::info;

use crate::domain::commands::ledger::LedgerListQuery;
use crate::io::rest::mappers::ledger_mapper::LedgerMapper;
use crate::io::rest::{ApiError, AuthenticatedUser};
use crate::AppState;

/// Create a router for wallet related APIs
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wallet))
        .route("/transactions", get(list_transactions))
        .route("/reconciliation", get(reconcile))
}

#[derive(Debug, Deserialize)]
pub struct TransactionListParams {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

/// Current balance, opening the wallet on first use
pub async fn get_wallet(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<WalletResponse>, ApiError> {
    info!("GET /api/wallet - user: {}", user_id);

    let wallet = state.wallet_service.get_or_create(&user_id).await?;
    Ok(Json(LedgerMapper::to_wallet_response(wallet)))
}

/// Ledger entries touching the caller, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(params): Query<TransactionListParams>,
) -> Result<Json<LedgerPageResponse>, ApiError> {
    info!("GET /api/wallet/transactions - user: {}, params: {:?}", user_id, params);

    let query = LedgerListQuery {
        after: params.after,
        limit: params.limit,
    };
    let result = state.ledger_service.list_for_owner(&user_id, query).await?;
    Ok(Json(LedgerMapper::to_page_response(result)))
}

pub async fn reconcile(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    info!("GET /api/wallet/reconciliation - user: {}", user_id);

    let report = state.ledger_service.reconcile(&user_id).await?;
    Ok(Json(LedgerMapper::to_reconciliation_response(report)))
}
