//! Concurrent requests against the same wallet or order.

mod common;

use marketplace_backend::domain::errors::{OrderError, SettlementError};
use marketplace_backend::domain::models::order::PaymentStatus;
use marketplace_backend::storage::Connection;
use marketplace_backend::Backend;

async fn parallel_checkouts_never_overdraw<C: Connection>(backend: Backend<C>) {
    let mut handles = Vec::new();
    for i in 0..20 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            backend
                .order_service
                .checkout(common::checkout("racer", &format!("seller-{}", i % 3), 1_000))
                .await
        }));
    }

    let mut paid = 0;
    let mut declined = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => paid += 1,
            Err(OrderError::Settlement(SettlementError::InsufficientFunds { .. })) => declined += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(paid, 10);
    assert_eq!(declined, 10);
    let wallet = backend.wallet_service.get("racer").await.unwrap();
    assert_eq!(wallet.balance, 0);
    assert!(backend.ledger_service.reconcile("racer").await.unwrap().balanced);
    assert!(backend.ledger_service.reconcile("platform").await.unwrap().balanced);
}

async fn parallel_cancels_refund_once<C: Connection>(backend: Backend<C>) {
    let order = backend
        .order_service
        .checkout(common::checkout("canceller", "seller-x", 2_500))
        .await
        .unwrap()
        .order;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let backend = backend.clone();
        let order_id = order.id.clone();
        handles.push(tokio::spawn(async move {
            backend.order_service.cancel_order(&order_id, "canceller").await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => assert_eq!(order.payment_status, PaymentStatus::Refunded),
            Err(OrderError::ConcurrentSettlementConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let order = backend
        .order_service
        .get_order(&order.id, "canceller")
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(backend.wallet_service.balance("canceller").await.unwrap(), 10_000);
    assert_eq!(backend.wallet_service.balance("seller-x").await.unwrap(), 10_000);
    assert_eq!(backend.ledger_service.entries_for(&order.id).await.unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_checkouts_never_overdraw_in_memory() {
    let (_, backend) = common::memory_backend();
    parallel_checkouts_never_overdraw(backend).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_checkouts_never_overdraw_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    parallel_checkouts_never_overdraw(backend).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_cancels_refund_once_in_memory() {
    let (_, backend) = common::memory_backend();
    parallel_cancels_refund_once(backend).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_cancels_refund_once_in_sqlite() {
    let (_dir, backend) = common::sqlite_backend().await;
    parallel_cancels_refund_once(backend).await;
}
