#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use marketplace_backend::config::{AppConfig, CommissionConfig, RetryPolicy, WalletPolicy};
use marketplace_backend::domain::commands::orders::{BookServiceCommand, CheckoutCommand, PaymentMethod};
use marketplace_backend::domain::models::order::OrderLine;
use marketplace_backend::storage::{DbConnection, MemoryConnection};
use marketplace_backend::Backend;
use tempfile::TempDir;

/// Products pay 10% commission, services and events 5%; users open with 10000
pub fn test_config() -> AppConfig {
    AppConfig {
        wallet: WalletPolicy::default(),
        commission: CommissionConfig {
            product_bps: 1_000,
            service_bps: 500,
            event_bps: 500,
        },
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        },
        ..AppConfig::default()
    }
}

pub fn memory_backend() -> (Arc<MemoryConnection>, Backend<MemoryConnection>) {
    let connection = Arc::new(MemoryConnection::new());
    let backend = Backend::new(connection.clone(), test_config());
    (connection, backend)
}

/// The returned directory must outlive the backend
pub async fn sqlite_backend() -> (TempDir, Backend<DbConnection>) {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.database_url = format!("sqlite://{}", dir.path().join("marketplace.db").display());
    config.max_connections = 4;
    let connection = Arc::new(DbConnection::init(&config).await.unwrap());
    (dir, Backend::new(connection, config))
}

pub fn checkout(buyer: &str, seller: &str, price: i64) -> CheckoutCommand {
    CheckoutCommand {
        buyer_id: buyer.to_string(),
        items: vec![OrderLine {
            payee_id: seller.to_string(),
            description: "Orthopedic dog bed".to_string(),
            unit_price: price,
            quantity: 1,
        }],
        shipping_address: Some("4 Kennel Road".to_string()),
        payment_method: PaymentMethod::Wallet,
    }
}

pub fn booking(buyer: &str, provider: &str, price: i64) -> BookServiceCommand {
    BookServiceCommand {
        buyer_id: buyer.to_string(),
        provider_id: provider.to_string(),
        service_name: "Grooming session".to_string(),
        price,
        slot: "slot-2024-07-01-09".to_string(),
        payment_method: PaymentMethod::Wallet,
    }
}
