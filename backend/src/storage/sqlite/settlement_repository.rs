use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use crate::domain::models::ledger::LedgerEntry;
use crate::domain::models::settlement::{SettlementLeg, SettlementRecord, SettlementStatus};
use crate::storage::traits::{LegOutcome, OpenSettlement, SettlementStorage};

use super::ledger_repository::insert_entry;
use super::wallet_repository::{add_to_balance, current_balance, debit_if_covered, ensure_wallet};
use super::DbConnection;

const SETTLEMENT_COLUMNS: &str = "id, causation_id, buyer_id, kind, total_amount, commission_bps, legs, status, reversal_attempt, created_at, updated_at";

/// Repository for settlement records and the multi-table leg steps
#[derive(Clone)]
pub struct SettlementRepository {
    db: DbConnection,
}

impl SettlementRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

fn settlement_from_row(row: &SqliteRow) -> Result<SettlementRecord> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let legs: String = row.try_get("legs")?;
    let commission_bps: i64 = row.try_get("commission_bps")?;
    let reversal_attempt: i64 = row.try_get("reversal_attempt")?;
    Ok(SettlementRecord {
        id: row.try_get("id")?,
        causation_id: row.try_get("causation_id")?,
        buyer_id: row.try_get("buyer_id")?,
        kind: kind.parse()?,
        total_amount: row.try_get("total_amount")?,
        commission_bps: u32::try_from(commission_bps)?,
        legs: serde_json::from_str::<Vec<SettlementLeg>>(&legs).context("Corrupt settlement legs")?,
        status: status.parse()?,
        reversal_attempt: u32::try_from(reversal_attempt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SettlementStorage for SettlementRepository {
    async fn open_settlement(&self, record: &SettlementRecord) -> Result<OpenSettlement> {
        let legs = serde_json::to_string(&record.legs)?;
        let mut tx = self.db.pool().begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO settlements (id, causation_id, buyer_id, kind, total_amount, commission_bps, legs, status, reversal_attempt, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(causation_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.causation_id)
        .bind(&record.buyer_id)
        .bind(record.kind.as_str())
        .bind(record.total_amount)
        .bind(i64::from(record.commission_bps))
        .bind(&legs)
        .bind(SettlementStatus::Debited.as_str())
        .bind(i64::from(record.reversal_attempt))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = self
                .get_settlement(&record.causation_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Settlement {} claimed but not readable", record.causation_id))?;
            return Ok(OpenSettlement::AlreadyOpened(existing));
        }

        match debit_if_covered(&mut *tx, &record.buyer_id, record.total_amount).await? {
            Some(new_balance) => {
                tx.commit().await?;
                debug!(
                    "Opened settlement {} for {}: buyer {} debited {}",
                    record.id, record.causation_id, record.buyer_id, record.total_amount
                );
                Ok(OpenSettlement::Opened { new_balance })
            }
            None => {
                let available = current_balance(&mut *tx, &record.buyer_id).await?;
                tx.rollback().await?;
                Ok(match available {
                    Some(available) => OpenSettlement::InsufficientFunds { available },
                    None => OpenSettlement::WalletMissing,
                })
            }
        }
    }

    async fn get_settlement(&self, causation_id: &str) -> Result<Option<SettlementRecord>> {
        let sql = format!("SELECT {} FROM settlements WHERE causation_id = ?", SETTLEMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(causation_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn list_settlements_by_status(&self, status: SettlementStatus) -> Result<Vec<SettlementRecord>> {
        let sql = format!(
            "SELECT {} FROM settlements WHERE status = ? ORDER BY created_at ASC",
            SETTLEMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(settlement_from_row).collect()
    }

    async fn apply_credit_leg(&self, entry: &LedgerEntry, opening_balance: i64) -> Result<LegOutcome> {
        let mut tx = self.db.pool().begin().await?;

        if !insert_entry(&mut *tx, entry).await? {
            tx.rollback().await?;
            return Ok(LegOutcome::AlreadyApplied);
        }

        ensure_wallet(&mut *tx, &entry.to_owner, opening_balance).await?;
        match add_to_balance(&mut *tx, &entry.to_owner, entry.amount).await? {
            Some(new_balance) => {
                tx.commit().await?;
                Ok(LegOutcome::Applied { new_balance })
            }
            None => {
                tx.rollback().await?;
                Ok(LegOutcome::WalletMissing)
            }
        }
    }

    async fn apply_debit_leg(&self, entry: &LedgerEntry) -> Result<LegOutcome> {
        let mut tx = self.db.pool().begin().await?;

        if !insert_entry(&mut *tx, entry).await? {
            tx.rollback().await?;
            return Ok(LegOutcome::AlreadyApplied);
        }

        match debit_if_covered(&mut *tx, &entry.from_owner, entry.amount).await? {
            Some(new_balance) => {
                tx.commit().await?;
                Ok(LegOutcome::Applied { new_balance })
            }
            None => {
                let available = current_balance(&mut *tx, &entry.from_owner).await?;
                tx.rollback().await?;
                Ok(match available {
                    Some(available) => LegOutcome::InsufficientFunds { available },
                    None => LegOutcome::WalletMissing,
                })
            }
        }
    }

    async fn transition_settlement(
        &self,
        causation_id: &str,
        from: SettlementStatus,
        to: SettlementStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE settlements SET status = ?, updated_at = ? WHERE causation_id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(causation_id)
        .bind(from.as_str())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin_reversal(&self, causation_id: &str) -> Result<Option<u32>> {
        let started = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE settlements
            SET status = ?, reversal_attempt = reversal_attempt + 1, updated_at = ?
            WHERE causation_id = ? AND status = ?
            RETURNING reversal_attempt
            "#,
        )
        .bind(SettlementStatus::Reversing.as_str())
        .bind(Utc::now())
        .bind(causation_id)
        .bind(SettlementStatus::Settled.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(attempt) = started {
            return Ok(Some(u32::try_from(attempt)?));
        }

        // Not settled; resume if an earlier attempt was interrupted
        let resumed = sqlx::query_scalar::<_, i64>(
            "SELECT reversal_attempt FROM settlements WHERE causation_id = ? AND status = ?",
        )
        .bind(causation_id)
        .bind(SettlementStatus::Reversing.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        resumed.map(u32::try_from).transpose().map_err(Into::into)
    }

    async fn complete_reversal(&self, causation_id: &str, buyer_id: &str, amount: i64) -> Result<Option<i64>> {
        let mut tx = self.db.pool().begin().await?;

        let marked = sqlx::query(
            "UPDATE settlements SET status = ?, updated_at = ? WHERE causation_id = ? AND status = ?",
        )
        .bind(SettlementStatus::Reversed.as_str())
        .bind(Utc::now())
        .bind(causation_id)
        .bind(SettlementStatus::Reversing.as_str())
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let new_balance = add_to_balance(&mut *tx, buyer_id, amount)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Buyer wallet {} missing during reversal", buyer_id))?;
        tx.commit().await?;
        Ok(Some(new_balance))
    }

    async fn abort_reversal(&self, causation_id: &str) -> Result<bool> {
        self.transition_settlement(causation_id, SettlementStatus::Reversing, SettlementStatus::Settled)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::CommissionRate;
    use crate::domain::models::ledger::{leg_keys, LedgerEntryKind};
    use crate::domain::models::order::{OrderKind, OrderLine};
    use crate::domain::models::settlement::SettlementPlan;
    use crate::storage::sqlite::WalletRepository;
    use crate::storage::traits::WalletStorage;
    use tempfile::TempDir;

    async fn setup_test() -> (SettlementRepository, WalletRepository, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("settlements.db").display());
        let db = DbConnection::new(&url, 4).await.unwrap();
        (SettlementRepository::new(db.clone()), WalletRepository::new(db), dir)
    }

    fn record(causation: &str, amount: i64) -> SettlementRecord {
        let plan = SettlementPlan::build(
            "buyer",
            OrderKind::Product,
            &[OrderLine {
                payee_id: "seller".to_string(),
                description: "chew toy".to_string(),
                unit_price: amount,
                quantity: 1,
            }],
            CommissionRate::from_bps(1_000).unwrap(),
            "platform",
        )
        .unwrap();
        SettlementRecord::from_plan(&plan, causation)
    }

    #[tokio::test]
    async fn test_open_settlement_debits_once() {
        let (repo, wallets, _dir) = setup_test().await;
        wallets.get_or_create_wallet("buyer", 10_000).await.unwrap();

        let opened = repo.open_settlement(&record("ord_1", 1_000)).await.unwrap();
        assert_eq!(opened, OpenSettlement::Opened { new_balance: 9_000 });

        let replay = repo.open_settlement(&record("ord_1", 1_000)).await.unwrap();
        assert!(matches!(replay, OpenSettlement::AlreadyOpened(ref r) if r.status == SettlementStatus::Debited));
        assert_eq!(wallets.get_wallet("buyer").await.unwrap().unwrap().balance, 9_000);
    }

    #[tokio::test]
    async fn test_open_settlement_without_funds_leaves_no_record() {
        let (repo, wallets, _dir) = setup_test().await;
        wallets.get_or_create_wallet("buyer", 500).await.unwrap();

        let outcome = repo.open_settlement(&record("ord_1", 1_000)).await.unwrap();
        assert_eq!(outcome, OpenSettlement::InsufficientFunds { available: 500 });
        assert!(repo.get_settlement("ord_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credit_leg_is_applied_once() {
        let (repo, wallets, _dir) = setup_test().await;
        let entry = LedgerEntry::new(
            "ord_1",
            leg_keys::settlement(0),
            "buyer",
            "seller",
            900,
            LedgerEntryKind::OrderPayment,
            1_000,
        );

        let first = repo.apply_credit_leg(&entry, 0).await.unwrap();
        assert_eq!(first, LegOutcome::Applied { new_balance: 900 });
        let second = repo.apply_credit_leg(&entry, 0).await.unwrap();
        assert_eq!(second, LegOutcome::AlreadyApplied);
        assert_eq!(wallets.get_wallet("seller").await.unwrap().unwrap().balance, 900);
    }

    #[tokio::test]
    async fn test_debit_leg_shortfall_writes_nothing() {
        let (repo, wallets, _dir) = setup_test().await;
        wallets.get_or_create_wallet("seller", 50).await.unwrap();
        let refund = LedgerEntry::new(
            "ord_1",
            leg_keys::refund(1, 0),
            "seller",
            "buyer",
            900,
            LedgerEntryKind::Refund,
            1_000,
        );

        let outcome = repo.apply_debit_leg(&refund).await.unwrap();
        assert_eq!(outcome, LegOutcome::InsufficientFunds { available: 50 });

        // The leg key is still free, so a later attempt can use it
        wallets.credit("seller", 850).await.unwrap();
        let retry = repo.apply_debit_leg(&refund).await.unwrap();
        assert_eq!(retry, LegOutcome::Applied { new_balance: 0 });
    }

    #[tokio::test]
    async fn test_reversal_lifecycle() {
        let (repo, wallets, _dir) = setup_test().await;
        wallets.get_or_create_wallet("buyer", 10_000).await.unwrap();
        repo.open_settlement(&record("ord_1", 1_000)).await.unwrap();

        // Still debited, nothing to reverse yet
        assert_eq!(repo.begin_reversal("ord_1").await.unwrap(), None);

        assert!(repo
            .transition_settlement("ord_1", SettlementStatus::Debited, SettlementStatus::Settled)
            .await
            .unwrap());
        assert_eq!(repo.begin_reversal("ord_1").await.unwrap(), Some(1));
        // Interrupted attempt resumes with the same number
        assert_eq!(repo.begin_reversal("ord_1").await.unwrap(), Some(1));

        assert!(repo.abort_reversal("ord_1").await.unwrap());
        assert_eq!(repo.begin_reversal("ord_1").await.unwrap(), Some(2));

        let balance = repo.complete_reversal("ord_1", "buyer", 1_000).await.unwrap();
        assert_eq!(balance, Some(10_000));
        assert_eq!(repo.complete_reversal("ord_1", "buyer", 1_000).await.unwrap(), None);

        let stored = repo.get_settlement("ord_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SettlementStatus::Reversed);
        assert_eq!(stored.reversal_attempt, 2);
        assert_eq!(stored.legs.len(), 2);
    }
}
