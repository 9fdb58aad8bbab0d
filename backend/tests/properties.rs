//! Property tests for money conservation and wallet non-negativity.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use marketplace_backend::config::WalletPolicy;
use marketplace_backend::domain::errors::WalletError;
use marketplace_backend::domain::models::order::{OrderKind, OrderLine};
use marketplace_backend::domain::models::settlement::SettlementPlan;
use marketplace_backend::domain::{CommissionRate, WalletService};
use marketplace_backend::storage::{Connection, MemoryConnection};

fn line_strategy() -> impl Strategy<Value = OrderLine> {
    (0..4usize, 1..50_000i64, 1..20u32).prop_map(|(payee, unit_price, quantity)| OrderLine {
        payee_id: format!("seller-{}", payee),
        description: "Bird cage".to_string(),
        unit_price,
        quantity,
    })
}

#[derive(Debug, Clone)]
enum WalletOp {
    Debit(i64),
    Credit(i64),
}

fn wallet_op_strategy() -> impl Strategy<Value = WalletOp> {
    prop_oneof![
        (1..5_000i64).prop_map(WalletOp::Debit),
        (1..2_000i64).prop_map(WalletOp::Credit),
    ]
}

/// What one concurrent op saw: the amount it moved (signed) and the
/// balance read straight after it
struct OpResult {
    moved: i64,
    balance_after: i64,
}

/// Fire every op at once against one wallet, then check nothing went
/// negative and the final balance accounts for exactly the ops that succeeded
async fn run_concurrently<C: Connection>(
    wallets: WalletService<C>,
    ops: Vec<WalletOp>,
) -> Result<(), TestCaseError> {
    let opening = wallets.get_or_create("owner").await.unwrap().balance;

    let tasks: Vec<_> = ops
        .into_iter()
        .map(|op| {
            let wallets = wallets.clone();
            tokio::spawn(async move {
                let moved = match op {
                    WalletOp::Debit(amount) => match wallets.try_debit("owner", amount).await {
                        Ok(balance) => {
                            assert!(balance >= 0, "debit left {}", balance);
                            -amount
                        }
                        Err(WalletError::InsufficientFunds { required, .. }) => {
                            assert_eq!(required, amount);
                            0
                        }
                        Err(other) => panic!("unexpected error: {}", other),
                    },
                    WalletOp::Credit(amount) => {
                        wallets.credit("owner", amount).await.unwrap();
                        amount
                    }
                };
                OpResult {
                    moved,
                    balance_after: wallets.balance("owner").await.unwrap(),
                }
            })
        })
        .collect();

    let mut net = 0;
    for task in tasks {
        let result = task.await.map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert!(result.balance_after >= 0);
        net += result.moved;
    }

    let wallet = wallets.get("owner").await.unwrap();
    prop_assert_eq!(wallet.balance, opening + net);
    prop_assert!(wallet.balance >= 0);
    Ok(())
}

fn multi_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_ops_keep_memory_wallet_consistent(ops in prop::collection::vec(wallet_op_strategy(), 1..40)) {
        multi_thread_runtime().block_on(async {
            let connection = Arc::new(MemoryConnection::new());
            run_concurrently(WalletService::new(connection, WalletPolicy::default()), ops).await
        })?;
    }

    #[test]
    fn concurrent_ops_keep_sqlite_wallet_consistent(ops in prop::collection::vec(wallet_op_strategy(), 1..40)) {
        multi_thread_runtime().block_on(async {
            let (_dir, backend) = common::sqlite_backend().await;
            run_concurrently(backend.wallet_service.clone(), ops).await
        })?;
    }
}

proptest! {
    #[test]
    fn plan_legs_sum_to_total(lines in prop::collection::vec(line_strategy(), 1..8), bps in 0..=10_000u32) {
        let rate = CommissionRate::from_bps(bps).unwrap();
        let plan = SettlementPlan::build("buyer", OrderKind::Product, &lines, rate, "platform").unwrap();

        let expected: i64 = lines.iter().map(|line| line.unit_price * i64::from(line.quantity)).sum();
        prop_assert_eq!(plan.total_amount, expected);
        prop_assert_eq!(plan.legs.iter().map(|leg| leg.amount).sum::<i64>(), expected);
        prop_assert!(plan.legs.iter().all(|leg| leg.amount > 0 && leg.payer == "buyer"));
        prop_assert!(plan.validate().is_ok());
    }

    #[test]
    fn commission_never_exceeds_rate(gross in 1..10_000_000i64, bps in 0..=10_000u32) {
        let rate = CommissionRate::from_bps(bps).unwrap();
        let (share, commission) = rate.split(gross);
        prop_assert_eq!(share + commission, gross);
        prop_assert!(commission >= 0 && share >= 0);
        prop_assert!(i128::from(commission) * 10_000 <= i128::from(gross) * i128::from(bps));
    }

    #[test]
    fn wallet_never_goes_negative(ops in prop::collection::vec(wallet_op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let connection = Arc::new(MemoryConnection::new());
            let wallets = WalletService::new(connection, WalletPolicy::default());
            let mut expected = wallets.get_or_create("owner").await.unwrap().balance;

            for op in ops {
                match op {
                    WalletOp::Debit(amount) => match wallets.try_debit("owner", amount).await {
                        Ok(balance) => {
                            prop_assert!(amount <= expected);
                            expected -= amount;
                            prop_assert_eq!(balance, expected);
                        }
                        Err(WalletError::InsufficientFunds { required, available }) => {
                            prop_assert_eq!(required, amount);
                            prop_assert_eq!(available, expected);
                            prop_assert!(amount > expected);
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {}", other),
                    },
                    WalletOp::Credit(amount) => {
                        expected += amount;
                        prop_assert_eq!(wallets.credit("owner", amount).await.unwrap(), expected);
                    }
                }
                prop_assert!(wallets.balance("owner").await.unwrap() >= 0);
            }
            Ok(())
        })?;
    }
}
