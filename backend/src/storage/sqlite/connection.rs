use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::storage::traits::Connection;

use super::{LedgerRepository, OrderRepository, SettlementRepository, WalletRepository};

/// DbConnection manages the SQLite pool and schema
#[derive(Clone)]
pub struct DbConnection {
    pool: Arc<SqlitePool>,
}

impl DbConnection {
    /// Open (creating if needed) the database at `url` and make sure the schema exists
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {}", url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", url))?;

        Self::setup_schema(&pool).await?;

        info!("Database ready at {}", url);
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Initialize the database named in the application config
    pub async fn init(config: &AppConfig) -> Result<Self> {
        Self::new(&config.database_url, config.max_connections).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Set up the required database schema
    async fn setup_schema(pool: &SqlitePool) -> Result<()> {
        // Wallets: balance can never be stored negative
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                owner_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL CHECK (balance >= 0),
                opening_balance INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Ledger: seq gives application order, (causation_id, leg_key) gives leg identity
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                causation_id TEXT NOT NULL,
                leg_key TEXT NOT NULL,
                from_owner TEXT NOT NULL,
                to_owner TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                kind TEXT NOT NULL,
                commission_bps INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (causation_id, leg_key)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_from_owner
            ON ledger_entries(from_owner, seq DESC);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_to_owner
            ON ledger_entries(to_owner, seq DESC);
            "#,
        )
        .execute(pool)
        .await?;

        // Append-only
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
            BEFORE UPDATE ON ledger_entries
            BEGIN
                SELECT RAISE(ABORT, 'ledger entries are immutable');
            END;
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
            BEFORE DELETE ON ledger_entries
            BEGIN
                SELECT RAISE(ABORT, 'ledger entries are immutable');
            END;
            "#,
        )
        .execute(pool)
        .await?;

        // One settlement per causation id
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settlements (
                id TEXT PRIMARY KEY,
                causation_id TEXT NOT NULL UNIQUE,
                buyer_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                total_amount INTEGER NOT NULL CHECK (total_amount > 0),
                commission_bps INTEGER NOT NULL,
                legs TEXT NOT NULL,
                status TEXT NOT NULL,
                reversal_attempt INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_settlements_status
            ON settlements(status);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                buyer_id TEXT NOT NULL,
                total_amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                settlement_ref TEXT,
                reference TEXT,
                shipping_address TEXT,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_buyer_id
            ON orders(buyer_id, seq DESC);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_payment_status
            ON orders(payment_status);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_lines (
                order_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                payee_id TEXT NOT NULL,
                description TEXT NOT NULL,
                unit_price INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                PRIMARY KEY (order_id, position),
                FOREIGN KEY (order_id) REFERENCES orders (id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_order_lines_payee_id
            ON order_lines(payee_id);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

impl Connection for DbConnection {
    type WalletRepository = WalletRepository;
    type LedgerRepository = LedgerRepository;
    type SettlementRepository = SettlementRepository;
    type OrderRepository = OrderRepository;

    fn create_wallet_repository(&self) -> Self::WalletRepository {
        WalletRepository::new(self.clone())
    }

    fn create_ledger_repository(&self) -> Self::LedgerRepository {
        LedgerRepository::new(self.clone())
    }

    fn create_settlement_repository(&self) -> Self::SettlementRepository {
        SettlementRepository::new(self.clone())
    }

    fn create_order_repository(&self) -> Self::OrderRepository {
        OrderRepository::new(self.clone())
    }
}
