//! End-to-end engine scenarios against the in-memory ledger.

mod common;

use agrocap_capital_engine::{
    BalanceChangeKind, CapitalEngine, ConstraintKind, EngineError, HealthStatus,
    PoolBalanceUpdate, ReleaseType,
};
use agrocap_primitives::{
    AdvanceCounters, AllocationPriority, Pool, PoolId, PoolStatus, ReservationStatus, RiskTier,
    TransactionType,
};
use agrocap_storage::{
    CapitalDelta, LedgerStore, MemoryLedger, NewTransaction, PoolConfigUpdate, TransactionFilter,
};
use assert_matches::assert_matches;
use chrono::Utc;
use common::*;
use rust_decimal::Decimal;
use std::time::Duration;

#[tokio::test]
async fn create_allocate_repay_lifecycle() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    let allocated = engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();
    assert_eq!(allocated.amount, Decimal::from(50_000));
    assert_eq!(allocated.balance_before, Decimal::from(1_000_000));
    assert_eq!(allocated.balance_after, Decimal::from(950_000));
    // tier A fees: 2.00% farmer, 1.00% buyer
    assert_eq!(allocated.fees.farmer_fee, Decimal::from(1_000));
    assert_eq!(allocated.fees.buyer_fee, Decimal::from(500));

    let after_allocation = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(after_allocation.available_capital, Decimal::from(950_000));
    assert_eq!(after_allocation.deployed_capital, Decimal::from(50_000));
    assert_eq!(after_allocation.counters.issued, 1);
    assert_eq!(after_allocation.counters.active, 1);

    let disbursements = engine
        .get_transactions(TransactionFilter {
            pool_id: Some(pool.id),
            types: vec![TransactionType::AdvanceDisbursement],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(disbursements.len(), 1);
    assert_eq!(disbursements[0].amount, Decimal::from(50_000));

    engine
        .release_capital(repayment(
            pool.id,
            "adv-1",
            ReleaseType::FullRepayment,
            50_000,
            1_000,
            0,
        ))
        .await
        .unwrap();

    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.available_capital, Decimal::from(1_001_000));
    assert_eq!(settled.deployed_capital, Decimal::ZERO);
    assert_eq!(settled.total_repaid, Decimal::from(50_000));
    assert_eq!(settled.total_fees_earned, Decimal::from(1_000));
    assert_eq!(settled.counters.completed, 1);
    assert_eq!(settled.counters.active, 0);
    assert!(settled.capital_is_consistent());
}

#[tokio::test]
async fn reservation_expires_and_capital_returns() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();

    let hold = engine
        .create_reservation(reservation(pool.id, 100_000, Some(1)))
        .await
        .unwrap();
    assert_eq!(hold.status, ReservationStatus::Active);

    // 950,000 available − 100,000 hold − 150,000 reserve
    let held = engine.get_balance(pool.id).await.unwrap();
    assert_eq!(held.effective_available, Decimal::from(700_000));

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let expired = engine.sweep_expired_reservations().await.unwrap();
    assert_eq!(expired, 1);

    let released = engine.get_balance(pool.id).await.unwrap();
    assert_eq!(released.effective_available, Decimal::from(800_000));

    // the freed headroom is allocatable again
    engine
        .allocate_capital(allocation(pool.id, "adv-2", Decimal::from(100_000)))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_cannot_double_spend() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    // pin effective availability to 60,000 with a long-lived hold
    engine
        .create_reservation(reservation(pool.id, 790_000, Some(600)))
        .await
        .unwrap();

    let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(2));
    let mut tasks = Vec::new();
    for i in 0..2 {
        let engine = engine.clone();
        let barrier = barrier.clone();
        let pool_id = pool.id;
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .allocate_capital(allocation(pool_id, &format!("adv-race-{i}"), Decimal::from(50_000)))
                .await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => assert_matches!(
                err,
                EngineError::ReserveRatioViolation { .. }
                    | EngineError::ConcurrentMutation { .. }
                    | EngineError::LockUnavailable(_)
            ),
        }
    }
    assert_eq!(successes, 1);

    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.deployed_capital, Decimal::from(50_000));
    assert!(settled.capital_is_consistent());
}

#[tokio::test]
async fn reserve_floor_binds_exactly() {
    // S4: 100,000 pool at 15% reserve; sequential 10,000 allocations
    let engine = engine();
    let mut req = pool_request(100_000);
    req.max_advance_amount = Some(Decimal::from(10_000));
    let pool = engine.create_pool(req).await.unwrap();

    for i in 0..8 {
        engine
            .allocate_capital(allocation(pool.id, &format!("adv-{i}"), Decimal::from(10_000)))
            .await
            .unwrap_or_else(|err| panic!("allocation {i} failed: {err}"));
    }
    let after_eight = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(after_eight.deployed_capital, Decimal::from(80_000));
    assert_eq!(after_eight.available_capital, Decimal::from(20_000));

    // the ninth would leave 10,000 against a 15,000 reserve
    let ninth = engine
        .allocate_capital(allocation(pool.id, "adv-8", Decimal::from(10_000)))
        .await;
    assert_matches!(ninth, Err(EngineError::ReserveRatioViolation { .. }));
}

#[tokio::test]
async fn default_loss_shrinks_the_pool() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();

    let outcome = engine
        .handle_default("adv-1", pool.id, Decimal::from(50_000), Decimal::from(10_000))
        .await
        .unwrap();
    assert_eq!(outcome.loss, Decimal::from(40_000));
    assert_eq!(outcome.default_rate, Decimal::ONE_HUNDRED);

    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.deployed_capital, Decimal::ZERO);
    assert_eq!(settled.available_capital, Decimal::from(960_000));
    assert_eq!(settled.total_capital, Decimal::from(960_000));
    assert_eq!(settled.counters.defaulted, 1);
    assert_eq!(settled.counters.active, 0);
    assert!(settled.capital_is_consistent());

    let adjustments = engine
        .get_transactions(TransactionFilter {
            pool_id: Some(pool.id),
            types: vec![TransactionType::Adjustment],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].amount, Decimal::from(-40_000));
}

fn raw_pool(name: &str, default_rate: Decimal) -> Pool {
    let now = Utc::now();
    Pool {
        id: PoolId::random(),
        name: name.to_owned(),
        description: None,
        status: PoolStatus::Active,
        risk_tier: RiskTier::A,
        currency: "MXN".to_owned(),
        total_capital: Decimal::from(1_000_000),
        available_capital: Decimal::from(1_000_000),
        deployed_capital: Decimal::ZERO,
        reserved_capital: Decimal::ZERO,
        target_return_rate: Decimal::from(12),
        actual_return_rate: Decimal::from(10),
        min_advance_amount: Decimal::from(5_000),
        max_advance_amount: Decimal::from(100_000),
        max_exposure_limit: Decimal::from(1_000_000),
        min_reserve_ratio: Decimal::from(15),
        counters: AdvanceCounters { issued: 200, completed: 150, defaulted: 2, active: 48 },
        total_disbursed: Decimal::ZERO,
        total_repaid: Decimal::ZERO,
        total_fees_earned: Decimal::ZERO,
        default_rate,
        auto_rebalance_enabled: false,
        last_allocation_at: None,
        created_at: now,
        updated_at: now,
        created_by: "tests".to_owned(),
    }
}

#[tokio::test]
async fn lowest_risk_selection_picks_the_safest_pool() {
    // S6: default rates 1%, 3%, 0.5% — the 0.5% pool must win
    let ledger = MemoryLedger::new();
    let mut expected = None;
    for (name, rate) in [("a", Decimal::from(1)), ("b", Decimal::from(3)), ("c", Decimal::new(5, 1))] {
        let pool = raw_pool(name, rate);
        if name == "c" {
            expected = Some(pool.id);
        }
        ledger
            .insert_pool(
                pool,
                NewTransaction::crediting(
                    TransactionType::CapitalDeposit,
                    Decimal::from(1_000_000),
                    "seed",
                ),
            )
            .await
            .unwrap();
    }

    let engine = agrocap_capital_engine::PoolEngine::new(
        ledger,
        agrocap_capital_engine::accel::InProcessAccelerator::new(),
        agrocap_capital_engine::EngineConfig::default(),
    );
    let allocated = engine
        .allocate_capital(selecting_allocation(50_000, AllocationPriority::LowestRisk))
        .await
        .unwrap();
    assert_eq!(allocated.pool_id, expected.unwrap());
}

#[tokio::test]
async fn allocation_and_full_repayment_round_trip() {
    // R1: fees = 0 returns the pool to its original breakdown
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();
    engine
        .release_capital(repayment(pool.id, "adv-1", ReleaseType::FullRepayment, 50_000, 0, 0))
        .await
        .unwrap();

    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.total_capital, pool.total_capital);
    assert_eq!(settled.available_capital, pool.available_capital);
    assert_eq!(settled.deployed_capital, Decimal::ZERO);
    assert_eq!(settled.reserved_capital, Decimal::ZERO);
    assert_eq!(
        settled.counters,
        AdvanceCounters { issued: 1, completed: 1, defaulted: 0, active: 0 }
    );
}

#[tokio::test]
async fn reservation_round_trip_leaves_the_ledger_untouched() {
    // R2
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let before = engine.get_pool_details(pool.id).await.unwrap();

    let hold = engine.create_reservation(reservation(pool.id, 200_000, None)).await.unwrap();
    let released = engine.release_reservation(hold.id).await.unwrap();
    assert_eq!(released, Decimal::from(200_000));

    let after = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(after.available_capital, before.available_capital);
    assert_eq!(after.reserved_capital, before.reserved_capital);
    let ledger_entries = engine
        .get_transactions(TransactionFilter::for_pool(pool.id))
        .await
        .unwrap();
    // only the opening deposit
    assert_eq!(ledger_entries.len(), 1);
}

#[tokio::test]
async fn max_advance_boundary_is_exact() {
    // B1
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    engine
        .allocate_capital(allocation(pool.id, "adv-max", Decimal::from(100_000)))
        .await
        .unwrap();

    let over = engine
        .allocate_capital(allocation(pool.id, "adv-over", Decimal::from(100_001)))
        .await;
    assert_matches!(over, Err(EngineError::AmountAboveMaximum { .. }));
}

#[tokio::test]
async fn allocation_may_land_exactly_on_the_reserve() {
    // B2: leaving available == required reserve is allowed
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    for i in 0..8 {
        engine
            .allocate_capital(allocation(pool.id, &format!("adv-fill-{i}"), Decimal::from(100_000)))
            .await
            .unwrap();
    }

    // available 200,000, reserve 150,000: exactly 50,000 fits
    engine
        .allocate_capital(allocation(pool.id, "adv-exact", Decimal::from(50_000)))
        .await
        .unwrap();
    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.available_capital, Decimal::from(150_000));

    // one peso more would cross the floor
    let engine = common::engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    for i in 0..8 {
        engine
            .allocate_capital(allocation(pool.id, &format!("adv-fill-{i}"), Decimal::from(100_000)))
            .await
            .unwrap();
    }
    let crossing = engine
        .allocate_capital(allocation(pool.id, "adv-cross", Decimal::new(5_000_100, 2)))
        .await;
    assert_matches!(crossing, Err(EngineError::ReserveRatioViolation { .. }));
}

#[tokio::test]
async fn committing_a_lapsed_reservation_fails() {
    // B3
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let hold = engine
        .create_reservation(reservation(pool.id, 50_000, Some(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let committed = engine.commit_reservation(hold.id).await;
    assert_matches!(committed, Err(EngineError::ReservationNotFound(_)));
}

#[tokio::test]
async fn reservation_commit_is_idempotent_and_blocks_release() {
    // P5
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let hold = engine.create_reservation(reservation(pool.id, 50_000, None)).await.unwrap();

    assert_eq!(engine.commit_reservation(hold.id).await.unwrap(), Decimal::from(50_000));
    assert_eq!(engine.commit_reservation(hold.id).await.unwrap(), Decimal::from(50_000));

    let before = engine.get_pool_details(pool.id).await.unwrap();
    let release = engine.release_reservation(hold.id).await;
    assert_matches!(release, Err(EngineError::ReservationNotFound(_)));
    let after = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn selection_failure_names_the_binding_constraints() {
    let engine = engine();
    seeded_pool(&engine, 1_000_000).await;

    // more than any pool's maximum advance
    let miss = engine
        .allocate_capital(selecting_allocation(1_000_000, AllocationPriority::HighestAvailable))
        .await;
    match miss {
        Err(EngineError::PoolNotFound { alternatives }) => {
            assert!(!alternatives.is_empty());
            assert!(alternatives.len() <= 3);
            assert_eq!(alternatives[0].failing_constraint, ConstraintKind::MaxAdvance);
        }
        other => panic!("expected PoolNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn preferred_pool_tier_must_match() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    let mut req = allocation(pool.id, "adv-tier", Decimal::from(50_000));
    req.risk_tier = RiskTier::C;
    let mismatch = engine.allocate_capital(req).await;
    assert_matches!(mismatch, Err(EngineError::RiskTierMismatch { .. }));
}

#[tokio::test]
async fn farmer_exposure_ceiling_is_enforced() {
    let engine = engine();
    let mut req = pool_request(1_000_000);
    req.max_exposure_limit = Some(Decimal::from(120_000));
    let pool = engine.create_pool(req).await.unwrap();

    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(100_000)))
        .await
        .unwrap();
    // same farmer would reach 200,000 against a 120,000 ceiling
    let blocked = engine
        .allocate_capital(allocation(pool.id, "adv-2", Decimal::from(100_000)))
        .await;
    assert_matches!(blocked, Err(EngineError::FarmerLimitExceeded { .. }));
}

#[tokio::test]
async fn paused_pools_reject_allocations() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    engine
        .update_pool(
            pool.id,
            PoolConfigUpdate { status: Some(PoolStatus::Paused), ..Default::default() },
        )
        .await
        .unwrap();

    let rejected = engine
        .allocate_capital(allocation(pool.id, "adv-paused", Decimal::from(50_000)))
        .await;
    assert_matches!(rejected, Err(EngineError::PoolPaused(_)));
}

#[tokio::test]
async fn closing_requires_recalled_capital() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();

    let premature = engine
        .update_pool(
            pool.id,
            PoolConfigUpdate { status: Some(PoolStatus::Closed), ..Default::default() },
        )
        .await;
    assert_matches!(premature, Err(EngineError::ValidationError(_)));

    engine
        .release_capital(repayment(pool.id, "adv-1", ReleaseType::FullRepayment, 50_000, 0, 0))
        .await
        .unwrap();
    engine
        .update_pool(
            pool.id,
            PoolConfigUpdate { status: Some(PoolStatus::Closed), ..Default::default() },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn subscribers_see_allocation_and_reservation_events() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let mut pool_events = engine.subscribe(pool.id);
    let mut all_events = engine.subscribe_all();

    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();
    let event = pool_events.recv().await.unwrap();
    assert_eq!(event.change_type, BalanceChangeKind::BalanceChanged);
    assert_eq!(event.amount, Decimal::from(50_000));
    assert_eq!(event.balance_before.available_capital, Decimal::from(1_000_000));
    assert_eq!(event.balance_after.available_capital, Decimal::from(950_000));

    let hold = engine.create_reservation(reservation(pool.id, 25_000, None)).await.unwrap();
    let event = pool_events.recv().await.unwrap();
    assert_eq!(event.change_type, BalanceChangeKind::ReservationCreated);

    engine.release_reservation(hold.id).await.unwrap();
    let event = pool_events.recv().await.unwrap();
    assert_eq!(event.change_type, BalanceChangeKind::ReservationReleased);

    // the wildcard subscriber saw all three
    for _ in 0..3 {
        assert!(all_events.recv().await.is_some());
    }
}

#[tokio::test]
async fn default_under_reserve_emits_health_warning() {
    let engine = engine();
    let mut req = pool_request(100_000);
    req.max_advance_amount = Some(Decimal::from(10_000));
    let pool = engine.create_pool(req).await.unwrap();
    let mut events = engine.subscribe(pool.id);

    for i in 0..8 {
        engine
            .allocate_capital(allocation(pool.id, &format!("adv-{i}"), Decimal::from(10_000)))
            .await
            .unwrap();
    }
    // raising the floor past the current ratio is accepted as-is; the
    // subsequent write-off then lands under it
    engine
        .update_pool(
            pool.id,
            PoolConfigUpdate {
                min_reserve_ratio: Some(Decimal::from(30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
        .handle_default("adv-0", pool.id, Decimal::from(10_000), Decimal::ZERO)
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = events.try_recv() {
        kinds.push(event.change_type);
    }
    assert!(kinds.contains(&BalanceChangeKind::HealthWarning));
}

#[tokio::test]
async fn fallback_mode_materializes_holds_in_the_ledger() {
    let engine = degraded_engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    let hold = engine.create_reservation(reservation(pool.id, 100_000, None)).await.unwrap();
    let held = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(held.available_capital, Decimal::from(900_000));
    assert_eq!(held.reserved_capital, Decimal::from(100_000));

    let reserve_entries = engine
        .get_transactions(TransactionFilter {
            pool_id: Some(pool.id),
            types: vec![TransactionType::ReserveAllocation],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(reserve_entries.len(), 1);

    engine.commit_reservation(hold.id).await.unwrap();
    let committed = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(committed.reserved_capital, Decimal::ZERO);
    assert_eq!(committed.deployed_capital, Decimal::from(100_000));
    assert_eq!(committed.counters.issued, 1);
    assert!(committed.capital_is_consistent());

    // a second hold released instead of committed
    let hold = engine.create_reservation(reservation(pool.id, 50_000, None)).await.unwrap();
    engine.release_reservation(hold.id).await.unwrap();
    let released = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(released.available_capital, Decimal::from(900_000));
    assert_eq!(released.reserved_capital, Decimal::ZERO);
}

#[tokio::test]
async fn investor_capital_movements_are_ledgered() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    engine
        .deposit_capital(pool.id, Decimal::from(200_000), "inv-1")
        .await
        .unwrap();
    engine
        .distribute_interest(pool.id, Decimal::from(12_000), "inv-1")
        .await
        .unwrap();
    let receipt = engine
        .withdraw_capital(pool.id, Decimal::from(100_000), "inv-1")
        .await
        .unwrap();
    assert_eq!(receipt.balance_after, Decimal::from(1_112_000));

    let settled = engine.get_pool_details(pool.id).await.unwrap();
    assert_eq!(settled.total_capital, Decimal::from(1_112_000));
    assert!(settled.capital_is_consistent());

    // withdrawing into the reserve floor is rejected
    let too_much = engine
        .withdraw_capital(pool.id, Decimal::from(1_000_000), "inv-1")
        .await;
    assert_matches!(
        too_much,
        Err(EngineError::ReserveRatioViolation { .. }
            | EngineError::InsufficientEffectiveAvailable { .. })
    );
}

#[tokio::test]
async fn atomic_batch_updates_roll_back_together() {
    let engine = engine();
    let pool_a = seeded_pool(&engine, 1_000_000).await;
    let pool_b = seeded_pool(&engine, 100_000).await;

    let updates = vec![
        PoolBalanceUpdate {
            pool_id: pool_a.id,
            delta: CapitalDelta {
                total: Decimal::from(10_000),
                available: Decimal::from(10_000),
                ..Default::default()
            },
            description: "manual correction".to_owned(),
        },
        PoolBalanceUpdate {
            pool_id: pool_b.id,
            delta: CapitalDelta {
                available: Decimal::from(-95_000),
                deployed: Decimal::from(95_000),
                ..Default::default()
            },
            description: "reclassification crossing the floor".to_owned(),
        },
    ];
    let outcome = engine.batch_update_balances(updates, true).await;
    assert!(outcome.is_err());

    let a = engine.get_pool_details(pool_a.id).await.unwrap();
    assert_eq!(a.total_capital, Decimal::from(1_000_000));

    // non-atomic mode commits what it can
    let updates = vec![
        PoolBalanceUpdate {
            pool_id: pool_a.id,
            delta: CapitalDelta {
                total: Decimal::from(10_000),
                available: Decimal::from(10_000),
                ..Default::default()
            },
            description: "manual correction".to_owned(),
        },
        PoolBalanceUpdate {
            pool_id: pool_b.id,
            delta: CapitalDelta {
                available: Decimal::from(-95_000),
                deployed: Decimal::from(95_000),
                ..Default::default()
            },
            description: "reclassification crossing the floor".to_owned(),
        },
    ];
    let outcomes = engine.batch_update_balances(updates, false).await.unwrap();
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_err());
    let a = engine.get_pool_details(pool_a.id).await.unwrap();
    assert_eq!(a.total_capital, Decimal::from(1_010_000));
}

#[tokio::test]
async fn summary_performance_and_health_reports() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let start = Utc::now();
    engine
        .allocate_capital(allocation(pool.id, "adv-1", Decimal::from(50_000)))
        .await
        .unwrap();
    engine
        .release_capital(repayment(pool.id, "adv-1", ReleaseType::FullRepayment, 50_000, 1_500, 500))
        .await
        .unwrap();

    let summary = engine.get_summary().await.unwrap();
    assert_eq!(summary.pool_count, 1);
    assert_eq!(summary.total_capital, Decimal::from(1_002_000));
    assert_eq!(summary.by_status["ACTIVE"], 1);
    assert_eq!(summary.by_tier["A"], 1);

    let end = Utc::now() + chrono::Duration::days(30);
    let performance = engine.get_performance(pool.id, start, end).await.unwrap();
    assert_eq!(performance.total_disbursed, Decimal::from(50_000));
    assert_eq!(performance.total_repaid, Decimal::from(50_000));
    assert_eq!(performance.total_fees, Decimal::from(2_000));
    assert_eq!(performance.advances_disbursed, 1);
    assert_eq!(performance.completion_rate, Decimal::ONE_HUNDRED);

    let health = engine.assess_health(pool.id).await.unwrap();
    // fully reserved, no defaults, no concentration, one completed advance
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.score >= Decimal::from(70));
    assert_eq!(health.performance, Decimal::ONE_HUNDRED);
}

#[tokio::test]
async fn eligibility_probe_reports_the_governing_constraint() {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;

    let fits = engine
        .check_advance_eligibility(pool.id, Decimal::from(50_000), RiskTier::A)
        .await
        .unwrap();
    assert!(fits.eligible);
    // max advance (100,000) binds tighter than the 10% ceiling or the
    // 800,000 effective availability
    assert_eq!(fits.max_allowed, Decimal::from(100_000));
    assert_eq!(fits.governing_constraint, ConstraintKind::MaxAdvance);

    let too_small = engine
        .check_advance_eligibility(pool.id, Decimal::from(1_000), RiskTier::A)
        .await
        .unwrap();
    assert!(!too_small.eligible);
    assert!(too_small.failing.contains(&ConstraintKind::MinAdvance));
}

#[tokio::test]
async fn balances_multi_get_skips_unknown_pools() {
    let engine = engine();
    let pool_a = seeded_pool(&engine, 1_000_000).await;
    let pool_b = seeded_pool(&engine, 500_000).await;

    let balances = engine
        .get_balances(&[pool_a.id, PoolId::random(), pool_b.id])
        .await
        .unwrap();
    assert_eq!(balances.len(), 2);

    // second read is served from cache
    let again = engine.get_balances(&[pool_a.id]).await.unwrap();
    assert!(again[0].from_cache);
}
