use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::domain::models::order::{Order, OrderChange, OrderGuard, OrderLine, PaymentStatus};
use crate::storage::traits::OrderStorage;

use super::DbConnection;

const ORDER_COLUMNS: &str = "id, kind, buyer_id, total_amount, status, payment_status, settlement_ref, reference, shipping_address, failure_reason, created_at, updated_at";

/// Repository for orders and their lines
#[derive(Clone)]
pub struct OrderRepository {
    db: DbConnection,
}

impl OrderRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    async fn load_lines(&self, order_id: &str) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT payee_id, description, unit_price, quantity
            FROM order_lines
            WHERE order_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let quantity: i64 = row.try_get("quantity")?;
                Ok(OrderLine {
                    payee_id: row.try_get("payee_id")?,
                    description: row.try_get("description")?,
                    unit_price: row.try_get("unit_price")?,
                    quantity: u32::try_from(quantity)?,
                })
            })
            .collect()
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Order>> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let lines = self.load_lines(&id).await?;
            orders.push(order_from_row(row, lines)?);
        }
        Ok(orders)
    }
}

fn order_from_row(row: &SqliteRow, lines: Vec<OrderLine>) -> Result<Order> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    Ok(Order {
        id: row.try_get("id")?,
        kind: kind.parse()?,
        buyer_id: row.try_get("buyer_id")?,
        lines,
        total_amount: row.try_get("total_amount")?,
        status: status.parse()?,
        payment_status: payment_status.parse()?,
        settlement_ref: row.try_get("settlement_ref")?,
        reference: row.try_get("reference")?,
        shipping_address: row.try_get("shipping_address")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrderStorage for OrderRepository {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, kind, buyer_id, total_amount, status, payment_status, settlement_ref, reference, shipping_address, failure_reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(order.kind.as_str())
        .bind(&order.buyer_id)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.settlement_ref)
        .bind(&order.reference)
        .bind(&order.shipping_address)
        .bind(&order.failure_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, position, payee_id, description, unit_price, quantity)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&order.id)
            .bind(position as i64)
            .bind(&line.payee_id)
            .bind(&line.description)
            .bind(line.unit_price)
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => {
                let lines = self.load_lines(order_id).await?;
                Ok(Some(order_from_row(&row, lines)?))
            }
            None => Ok(None),
        }
    }

    async fn list_orders_for_user(&self, user_id: &str, limit: u32, after: Option<&str>) -> Result<Vec<Order>> {
        let rows = if let Some(after_id) = after {
            let sql = format!(
                r#"
                SELECT {} FROM orders
                WHERE (buyer_id = ? OR id IN (SELECT order_id FROM order_lines WHERE payee_id = ?))
                  AND seq < (SELECT seq FROM orders WHERE id = ?)
                ORDER BY seq DESC
                LIMIT ?
                "#,
                ORDER_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id)
                .bind(user_id)
                .bind(after_id)
                .bind(i64::from(limit))
                .fetch_all(self.db.pool())
                .await?
        } else {
            let sql = format!(
                r#"
                SELECT {} FROM orders
                WHERE buyer_id = ? OR id IN (SELECT order_id FROM order_lines WHERE payee_id = ?)
                ORDER BY seq DESC
                LIMIT ?
                "#,
                ORDER_COLUMNS
            );
            sqlx::query(&sql)
                .bind(user_id)
                .bind(user_id)
                .bind(i64::from(limit))
                .fetch_all(self.db.pool())
                .await?
        };

        self.hydrate(rows).await
    }

    async fn transition_order(&self, order_id: &str, guard: &OrderGuard, change: &OrderChange) -> Result<Option<Order>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE orders SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(status) = change.status {
            builder.push(", status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = change.payment_status {
            builder.push(", payment_status = ").push_bind(payment_status.as_str());
        }
        if let Some(settlement_ref) = &change.settlement_ref {
            builder.push(", settlement_ref = ").push_bind(settlement_ref.clone());
        }
        if let Some(reason) = &change.failure_reason {
            builder.push(", failure_reason = ").push_bind(reason.clone());
        }

        builder.push(" WHERE id = ").push_bind(order_id.to_string());
        if !guard.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &guard.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if !guard.payment_statuses.is_empty() {
            builder.push(" AND payment_status IN (");
            let mut separated = builder.separated(", ");
            for payment_status in &guard.payment_statuses {
                separated.push_bind(payment_status.as_str());
            }
            separated.push_unseparated(")");
        }

        let result = builder.build().execute(self.db.pool()).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_order(order_id).await
    }

    async fn list_orders_by_payment_status(&self, payment_status: PaymentStatus) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE payment_status = ? ORDER BY seq ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(payment_status.as_str())
            .fetch_all(self.db.pool())
            .await?;

        self.hydrate(rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::order::{OrderKind, OrderStatus};
    use tempfile::TempDir;

    async fn setup_test() -> (OrderRepository, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("orders.db").display());
        let db = DbConnection::new(&url, 4).await.unwrap();
        (OrderRepository::new(db), dir)
    }

    fn order(buyer: &str, seller: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Order::generate_id(OrderKind::Product),
            kind: OrderKind::Product,
            buyer_id: buyer.to_string(),
            lines: vec![
                OrderLine {
                    payee_id: seller.to_string(),
                    description: "dog bed".to_string(),
                    unit_price: 800,
                    quantity: 1,
                },
                OrderLine {
                    payee_id: seller.to_string(),
                    description: "collar".to_string(),
                    unit_price: 100,
                    quantity: 2,
                },
            ],
            total_amount: 1_000,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            settlement_ref: None,
            reference: None,
            shipping_address: Some("1 Bark Street".to_string()),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_keeps_line_order() {
        let (repo, _dir) = setup_test().await;
        let original = order("buyer", "seller");
        repo.insert_order(&original).await.unwrap();

        let stored = repo.get_order(&original.id).await.unwrap().unwrap();
        assert_eq!(stored.lines, original.lines);
        assert_eq!(stored.shipping_address.as_deref(), Some("1 Bark Street"));
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_guarded_transition_only_applies_once() {
        let (repo, _dir) = setup_test().await;
        let original = order("buyer", "seller");
        repo.insert_order(&original).await.unwrap();

        let guard = OrderGuard::payment(&[PaymentStatus::Pending, PaymentStatus::Failed]);
        let change = OrderChange::payment(PaymentStatus::Processing);

        let first = repo.transition_order(&original.id, &guard, &change).await.unwrap();
        assert_eq!(first.unwrap().payment_status, PaymentStatus::Processing);

        let second = repo.transition_order(&original.id, &guard, &change).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_transition_sets_and_clears_failure() {
        let (repo, _dir) = setup_test().await;
        let original = order("buyer", "seller");
        repo.insert_order(&original).await.unwrap();

        let failed = repo
            .transition_order(
                &original.id,
                &OrderGuard::default(),
                &OrderChange::payment(PaymentStatus::Failed).failure("insufficient funds"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("insufficient funds"));

        let paid = repo
            .transition_order(
                &original.id,
                &OrderGuard::payment(&[PaymentStatus::Failed]).with_statuses(&[OrderStatus::Pending]),
                &OrderChange::payment(PaymentStatus::Paid)
                    .status(OrderStatus::Processing)
                    .settlement_ref("stl_1".to_string())
                    .clear_failure(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.failure_reason, None);
        assert_eq!(paid.settlement_ref.as_deref(), Some("stl_1"));
        assert_eq!(paid.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_list_for_user_includes_payee_side() {
        let (repo, _dir) = setup_test().await;
        let first = order("buyer", "seller");
        let second = order("buyer", "other-seller");
        repo.insert_order(&first).await.unwrap();
        repo.insert_order(&second).await.unwrap();

        let buyer_orders = repo.list_orders_for_user("buyer", 10, None).await.unwrap();
        assert_eq!(buyer_orders.len(), 2);
        assert_eq!(buyer_orders[0].id, second.id);

        let page = repo
            .list_orders_for_user("buyer", 10, Some(&second.id))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);

        let seller_orders = repo.list_orders_for_user("seller", 10, None).await.unwrap();
        assert_eq!(seller_orders.len(), 1);
        assert_eq!(seller_orders[0].id, first.id);
    }
}
