use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use tracing::debug;

use crate::domain::models::wallet::Wallet;
use crate::storage::traits::{DebitOutcome, WalletStorage};

use super::DbConnection;

/// Repository for wallet rows
#[derive(Clone)]
pub struct WalletRepository {
    db: DbConnection,
}

impl WalletRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn wallet_from_row(row: &SqliteRow) -> Result<Wallet> {
    Ok(Wallet {
        owner_id: row.try_get("owner_id")?,
        balance: row.try_get("balance")?,
        opening_balance: row.try_get("opening_balance")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert the wallet with `opening_balance` unless it already exists
pub(crate) async fn ensure_wallet<'e, E>(executor: E, owner_id: &str, opening_balance: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO wallets (owner_id, balance, opening_balance, version, created_at, updated_at)
        VALUES (?, ?, ?, 0, ?, ?)
        ON CONFLICT(owner_id) DO NOTHING
        "#,
    )
    .bind(owner_id)
    .bind(opening_balance)
    .bind(opening_balance)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Subtract `amount` if and only if the balance covers it. `None` means no
/// row matched: either the wallet is missing or the funds are short.
pub(crate) async fn debit_if_covered<'e, E>(executor: E, owner_id: &str, amount: i64) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let balance = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE wallets
        SET balance = balance - ?, version = version + 1, updated_at = ?
        WHERE owner_id = ? AND balance >= ?
        RETURNING balance
        "#,
    )
    .bind(amount)
    .bind(Utc::now())
    .bind(owner_id)
    .bind(amount)
    .fetch_optional(executor)
    .await?;
    Ok(balance)
}

/// Add `amount`; `None` if the wallet is missing
pub(crate) async fn add_to_balance<'e, E>(executor: E, owner_id: &str, amount: i64) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let balance = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE wallets
        SET balance = balance + ?, version = version + 1, updated_at = ?
        WHERE owner_id = ?
        RETURNING balance
        "#,
    )
    .bind(amount)
    .bind(Utc::now())
    .bind(owner_id)
    .fetch_optional(executor)
    .await?;
    Ok(balance)
}

pub(crate) async fn current_balance<'e, E>(executor: E, owner_id: &str) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM wallets WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(executor)
        .await?;
    Ok(balance)
}

#[async_trait]
impl WalletStorage for WalletRepository {
    async fn get_or_create_wallet(&self, owner_id: &str, opening_balance: i64) -> Result<Wallet> {
        if ensure_wallet(self.db.pool(), owner_id, opening_balance).await? {
            debug!("Created wallet for {} with opening balance {}", owner_id, opening_balance);
        }
        self.get_wallet(owner_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Wallet {} vanished after creation", owner_id))
    }

    async fn get_wallet(&self, owner_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, balance, opening_balance, version, created_at, updated_at
            FROM wallets
            WHERE owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn try_debit(&self, owner_id: &str, amount: i64) -> Result<DebitOutcome> {
        if let Some(new_balance) = debit_if_covered(self.db.pool(), owner_id, amount).await? {
            return Ok(DebitOutcome::Debited { new_balance });
        }
        // The debit did not happen; this read only explains why
        Ok(match current_balance(self.db.pool(), owner_id).await? {
            Some(available) => DebitOutcome::InsufficientFunds { available },
            None => DebitOutcome::WalletMissing,
        })
    }

    async fn credit(&self, owner_id: &str, amount: i64) -> Result<Option<i64>> {
        add_to_balance(self.db.pool(), owner_id, amount).await
    }
}
