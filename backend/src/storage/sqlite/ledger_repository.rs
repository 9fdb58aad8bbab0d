use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use crate::domain::models::ledger::LedgerEntry;
use crate::storage::traits::LedgerStorage;

use super::DbConnection;

const ENTRY_COLUMNS: &str =
    "id, causation_id, leg_key, from_owner, to_owner, amount, kind, commission_bps, created_at";

/// Repository for the append-only ledger
#[derive(Clone)]
pub struct LedgerRepository {
    db: DbConnection,
}

impl LedgerRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

pub(crate) fn ledger_entry_from_row(row: &SqliteRow) -> Result<LedgerEntry> {
    let kind: String = row.try_get("kind")?;
    let commission_bps: i64 = row.try_get("commission_bps")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        causation_id: row.try_get("causation_id")?,
        leg_key: row.try_get("leg_key")?,
        from_owner: row.try_get("from_owner")?,
        to_owner: row.try_get("to_owner")?,
        amount: row.try_get("amount")?,
        kind: kind.parse()?,
        commission_bps: u32::try_from(commission_bps)?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert `entry` unless its `(causation_id, leg_key)` is already recorded
pub(crate) async fn insert_entry<'e, E>(executor: E, entry: &LedgerEntry) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, causation_id, leg_key, from_owner, to_owner, amount, kind, commission_bps, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(causation_id, leg_key) DO NOTHING
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.causation_id)
    .bind(&entry.leg_key)
    .bind(&entry.from_owner)
    .bind(&entry.to_owner)
    .bind(entry.amount)
    .bind(entry.kind.as_str())
    .bind(i64::from(entry.commission_bps))
    .bind(entry.created_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl LedgerStorage for LedgerRepository {
    async fn append_entry(&self, entry: &LedgerEntry) -> Result<bool> {
        insert_entry(self.db.pool(), entry).await
    }

    async fn entries_for_causation(&self, causation_id: &str) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE causation_id = ? ORDER BY seq ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(causation_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn list_entries_for_owner(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = if let Some(after_id) = after {
            let sql = format!(
                r#"
                SELECT {} FROM ledger_entries
                WHERE (from_owner = ? OR to_owner = ?)
                  AND seq < (SELECT seq FROM ledger_entries WHERE id = ?)
                ORDER BY seq DESC
                LIMIT ?
                "#,
                ENTRY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(owner_id)
                .bind(owner_id)
                .bind(after_id)
                .bind(i64::from(limit))
                .fetch_all(self.db.pool())
                .await?
        } else {
            let sql = format!(
                r#"
                SELECT {} FROM ledger_entries
                WHERE from_owner = ? OR to_owner = ?
                ORDER BY seq DESC
                LIMIT ?
                "#,
                ENTRY_COLUMNS
            );
            sqlx::query(&sql)
                .bind(owner_id)
                .bind(owner_id)
                .bind(i64::from(limit))
                .fetch_all(self.db.pool())
                .await?
        };

        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn net_flow_for_owner(&self, owner_id: &str) -> Result<i64> {
        let net = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(CASE WHEN to_owner = ? THEN amount ELSE 0 END), 0)
                 - COALESCE(SUM(CASE WHEN from_owner = ? THEN amount ELSE 0 END), 0)
            FROM ledger_entries
            WHERE to_owner = ? OR from_owner = ?
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .bind(owner_id)
        .bind(owner_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ledger::{leg_keys, LedgerEntryKind};
    use tempfile::TempDir;

    async fn setup_test() -> (LedgerRepository, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let db = DbConnection::new(&url, 4).await.unwrap();
        (LedgerRepository::new(db), dir)
    }

    fn payment(causation: &str, index: usize, to: &str, amount: i64) -> LedgerEntry {
        LedgerEntry::new(
            causation,
            leg_keys::settlement(index),
            "buyer",
            to,
            amount,
            LedgerEntryKind::OrderPayment,
            1_000,
        )
    }

    #[tokio::test]
    async fn test_duplicate_leg_is_ignored() {
        let (repo, _dir) = setup_test().await;

        assert!(repo.append_entry(&payment("ord_1", 0, "seller", 900)).await.unwrap());
        // Same leg, fresh entry id
        assert!(!repo.append_entry(&payment("ord_1", 0, "seller", 900)).await.unwrap());

        let entries = repo.entries_for_causation("ord_1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].commission_bps, 1_000);
    }

    #[tokio::test]
    async fn test_list_for_owner_pages_newest_first() {
        let (repo, _dir) = setup_test().await;
        for i in 0..5 {
            repo.append_entry(&payment(&format!("ord_{}", i), 0, "seller", 100 + i as i64))
                .await
                .unwrap();
        }

        let first = repo.list_entries_for_owner("seller", 2, None).await.unwrap();
        assert_eq!(first.iter().map(|e| e.amount).collect::<Vec<_>>(), vec![104, 103]);

        let second = repo
            .list_entries_for_owner("seller", 2, Some(&first[1].id))
            .await
            .unwrap();
        assert_eq!(second.iter().map(|e| e.amount).collect::<Vec<_>>(), vec![102, 101]);

        assert!(repo.list_entries_for_owner("stranger", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_net_flow() {
        let (repo, _dir) = setup_test().await;
        repo.append_entry(&payment("ord_1", 0, "seller", 900)).await.unwrap();
        repo.append_entry(&payment("ord_1", 1, "platform", 100)).await.unwrap();

        assert_eq!(repo.net_flow_for_owner("buyer").await.unwrap(), -1_000);
        assert_eq!(repo.net_flow_for_owner("seller").await.unwrap(), 900);
        assert_eq!(repo.net_flow_for_owner("nobody").await.unwrap(), 0);
    }
}
