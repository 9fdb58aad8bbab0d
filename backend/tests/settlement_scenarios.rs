//! End-to-end money flows through the order service, run against both
//! storage backends.

mod common;

use marketplace_backend::domain::errors::{OrderError, ReversalError, SettlementError};
use marketplace_backend::domain::models::order::{OrderStatus, PaymentStatus};
use marketplace_backend::storage::Connection;
use marketplace_backend::Backend;

async fn balance<C: Connection>(backend: &Backend<C>, owner: &str) -> i64 {
    backend.wallet_service.get_or_create(owner).await.unwrap().balance
}

async fn assert_reconciled<C: Connection>(backend: &Backend<C>, owners: &[&str]) {
    for owner in owners {
        let report = backend.ledger_service.reconcile(owner).await.unwrap();
        assert!(report.balanced, "{} does not reconcile: {:?}", owner, report);
    }
}

/// Product purchase at 10%: buyer pays 1000, seller gets 900, platform 100
async fn product_purchase_splits_commission<C: Connection>(backend: Backend<C>) {
    let seller_before = balance(&backend, "seller-a").await;

    let result = backend
        .order_service
        .checkout(common::checkout("buyer-a", "seller-a", 1_000))
        .await
        .unwrap();

    assert_eq!(result.new_balance, Some(9_000));
    assert_eq!(result.order.payment_status, PaymentStatus::Paid);
    assert_eq!(balance(&backend, "buyer-a").await, 9_000);
    assert_eq!(balance(&backend, "seller-a").await, seller_before + 900);
    assert_eq!(balance(&backend, "platform").await, 100);

    let entries = backend.ledger_service.entries_for(&result.order.id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.from_owner == "buyer-a"));
    assert_eq!(entries.iter().map(|entry| entry.amount).sum::<i64>(), 1_000);

    assert_reconciled(&backend, &["buyer-a", "seller-a", "platform"]).await;
}

/// Buyer holding 500 cannot pay 1000; nothing moves and the order stays pending
async fn short_buyer_is_rejected<C: Connection>(backend: Backend<C>) {
    backend
        .order_service
        .checkout(common::checkout("buyer-b", "seller-b", 9_500))
        .await
        .unwrap();
    assert_eq!(balance(&backend, "buyer-b").await, 500);
    let platform_before = balance(&backend, "platform").await;

    let err = backend
        .order_service
        .checkout(common::checkout("buyer-b", "seller-b", 1_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Settlement(SettlementError::InsufficientFunds {
            required: 1_000,
            available: 500
        })
    ));

    assert_eq!(balance(&backend, "buyer-b").await, 500);
    assert_eq!(balance(&backend, "platform").await, platform_before);

    let orders = backend
        .order_service
        .list_orders("buyer-b", Default::default())
        .await
        .unwrap()
        .orders;
    let rejected = orders.iter().find(|order| order.total_amount == 1_000).unwrap();
    assert_eq!(rejected.status, OrderStatus::Pending);
    assert_eq!(rejected.payment_status, PaymentStatus::Failed);
    assert!(backend.ledger_service.entries_for(&rejected.id).await.unwrap().is_empty());

    assert_reconciled(&backend, &["buyer-b", "seller-b", "platform"]).await;
}

/// Cancelling a 1180 booking at 5% takes back 1121 and 59 and refunds 1180
async fn cancellation_refunds_everything<C: Connection>(backend: Backend<C>) {
    let groomer_before = balance(&backend, "groomer-c").await;

    let result = backend
        .order_service
        .book_service(common::booking("buyer-c", "groomer-c", 1_180))
        .await
        .unwrap();
    assert_eq!(balance(&backend, "groomer-c").await, groomer_before + 1_121);
    assert_eq!(balance(&backend, "platform").await, 59);
    assert_eq!(balance(&backend, "buyer-c").await, 8_820);

    let cancelled = backend
        .order_service
        .cancel_order(&result.order.id, "buyer-c")
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);

    assert_eq!(balance(&backend, "buyer-c").await, 10_000);
    assert_eq!(balance(&backend, "groomer-c").await, groomer_before);
    assert_eq!(balance(&backend, "platform").await, 0);

    // Two settlement legs, two refund legs; nothing rewritten
    let entries = backend.ledger_service.entries_for(&result.order.id).await.unwrap();
    assert_eq!(entries.len(), 4);

    // Cancelling again is a no-op
    let again = backend
        .order_service
        .cancel_order(&result.order.id, "buyer-c")
        .await
        .unwrap();
    assert_eq!(again.payment_status, PaymentStatus::Refunded);
    assert_eq!(balance(&backend, "buyer-c").await, 10_000);

    assert_reconciled(&backend, &["buyer-c", "groomer-c", "platform"]).await;
}

/// Same booking, but the groomer has since spent down to 50
async fn spent_payee_blocks_refund<C: Connection>(backend: Backend<C>) {
    let result = backend
        .order_service
        .book_service(common::booking("buyer-d", "groomer-d", 1_180))
        .await
        .unwrap();
    let groomer_balance = balance(&backend, "groomer-d").await;
    backend
        .order_service
        .checkout(common::checkout("groomer-d", "pet-shop-d", groomer_balance - 50))
        .await
        .unwrap();
    assert_eq!(balance(&backend, "groomer-d").await, 50);
    let platform_before = balance(&backend, "platform").await;

    let err = backend
        .order_service
        .cancel_order(&result.order.id, "buyer-d")
        .await
        .unwrap_err();
    match err {
        OrderError::Reversal(ReversalError::PartialPayeeShortfall {
            payee_id,
            required,
            available,
        }) => {
            assert_eq!(payee_id, "groomer-d");
            assert_eq!(required, 1_121);
            assert_eq!(available, 50);
        }
        other => panic!("expected a payee shortfall, got {:?}", other),
    }

    assert_eq!(balance(&backend, "buyer-d").await, 8_820);
    assert_eq!(balance(&backend, "groomer-d").await, 50);
    assert_eq!(balance(&backend, "platform").await, platform_before);

    let order = backend
        .order_service
        .get_order(&result.order.id, "buyer-d")
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert!(order.failure_reason.is_some());

    assert_reconciled(&backend, &["buyer-d", "groomer-d", "pet-shop-d", "platform"]).await;
}

#[tokio::test]
async fn test_product_purchase_splits_commission_in_memory() {
    let (_, backend) = common::memory_backend();
    product_purchase_splits_commission(backend).await;
}

#[tokio::test]
async fn test_product_purchase_splits_commission_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    product_purchase_splits_commission(backend).await;
}

#[tokio::test]
async fn test_short_buyer_is_rejected_in_memory() {
    let (_, backend) = common::memory_backend();
    short_buyer_is_rejected(backend).await;
}

#[tokio::test]
async fn test_short_buyer_is_rejected_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    short_buyer_is_rejected(backend).await;
}

#[tokio::test]
async fn test_cancellation_refunds_everything_in_memory() {
    let (_, backend) = common::memory_backend();
    cancellation_refunds_everything(backend).await;
}

#[tokio::test]
async fn test_cancellation_refunds_everything_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    cancellation_refunds_everything(backend).await;
}

#[tokio::test]
async fn test_spent_payee_blocks_refund_in_memory() {
    let (_, backend) = common::memory_backend();
    spent_payee_blocks_refund(backend).await;
}

#[tokio::test]
async fn test_spent_payee_blocks_refund_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    spent_payee_blocks_refund(backend).await;
}

#[tokio::test]
async fn test_interrupted_payout_is_finished_by_recovery() {
    let (connection, backend) = common::memory_backend();
    // More faults than the retry budget
    connection.inject_credit_faults(3);

    let err = backend
        .order_service
        .checkout(common::checkout("buyer-e", "seller-e", 1_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Settlement(SettlementError::CreditIncomplete { .. })
    ));
    assert_eq!(balance(&backend, "buyer-e").await, 9_000);

    let report = backend.order_service.recover_in_flight().await.unwrap();
    assert_eq!(report.orders_marked_paid, 1);
    assert!(report.still_in_flight.is_empty());

    assert_eq!(balance(&backend, "seller-e").await, 10_900);
    assert_eq!(balance(&backend, "platform").await, 100);
    assert_reconciled(&backend, &["buyer-e", "seller-e", "platform"]).await;
}
