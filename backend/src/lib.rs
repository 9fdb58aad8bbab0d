//! # Marketplace Backend
//!
//! Settlement core for a pet marketplace: custodial wallets, an append-only
//! ledger, payment settlement with platform commission, full-refund
//! reversals and the order lifecycle that drives them.
//!
//! ## Architecture
//!
//! ```text
//! IO Layer (REST API, handlers)
//!     ↓
//! Domain Layer (wallet, ledger, settlement, reversal, orders)
//!     ↓
//! Storage Layer (SQLite, or in-memory for tests)
//! ```
//!
//! Services are generic over [`storage::Connection`], so the same domain code
//! runs against SQLite in production and against [`storage::MemoryConnection`]
//! in tests.

pub mod config;
pub mod domain;
pub mod io;
pub mod storage;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::{
    CommissionPolicy, ContextCommissionPolicy, LedgerService, OrderService, ReversalService,
    SettlementService, WalletService,
};
use crate::storage::{Connection, DbConnection};

/// Every service the API needs, wired over one storage connection
#[derive(Clone)]
pub struct Backend<C: Connection> {
    pub wallet_service: WalletService<C>,
    pub ledger_service: LedgerService<C>,
    pub order_service: OrderService<C>,
    pub config: Arc<AppConfig>,
}

impl<C: Connection> Backend<C> {
    pub fn new(connection: Arc<C>, config: AppConfig) -> Self {
        let commission_policy: Arc<dyn CommissionPolicy> =
            Arc::new(ContextCommissionPolicy::from_config(&config.commission));

        let wallet_service = WalletService::new(connection.clone(), config.wallet.clone());
        let ledger_service = LedgerService::new(connection.clone(), config.paging);
        let settlement_service = SettlementService::new(
            connection.clone(),
            wallet_service.clone(),
            commission_policy,
            config.retry,
        );
        let reversal_service = ReversalService::new(connection.clone(), wallet_service.clone(), config.retry);
        let order_service = OrderService::new(connection, settlement_service, reversal_service, config.paging);

        Self {
            wallet_service,
            ledger_service,
            order_service,
            config: Arc::new(config),
        }
    }
}

/// Application state shared by the REST handlers
pub type AppState = Backend<DbConnection>;

/// Open the database and build the services
pub async fn initialize_backend(config: AppConfig) -> Result<AppState> {
    info!("Setting up database at {}", config.database_url);
    let connection = Arc::new(DbConnection::init(&config).await?);

    info!("Setting up domain services");
    Ok(Backend::new(connection, config))
}

/// Create the Axum router with all routes configured
pub fn create_router(app_state: AppState) -> Result<Router> {
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", app_state.config.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Ok(Router::new()
        .nest("/api", io::rest::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state))
}
