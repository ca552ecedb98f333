//! Property tests: conservation, non-negativity and the reserve floor hold
//! across arbitrary operation sequences.

mod common;

use agrocap_capital_engine::{CapitalEngine, EngineError, ReleaseType};
use agrocap_primitives::money::percent_of;
use agrocap_storage::TransactionFilter;
use common::*;
use proptest::prelude::*;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
enum Op {
    Allocate(u32),
    RepayNext { fees: u32, penalties: u32 },
    DefaultNext { recovered_pct: u8 },
    Deposit(u32),
    Withdraw(u32),
    Interest(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (5_000u32..=60_000).prop_map(Op::Allocate),
        2 => (0u32..=2_000, 0u32..=1_000)
            .prop_map(|(fees, penalties)| Op::RepayNext { fees, penalties }),
        1 => (0u8..=100).prop_map(|recovered_pct| Op::DefaultNext { recovered_pct }),
        1 => (1u32..=100_000).prop_map(Op::Deposit),
        1 => (1u32..=100_000).prop_map(Op::Withdraw),
        1 => (1u32..=10_000).prop_map(Op::Interest),
    ]
}

/// Business rejections are expected under random inputs; corruption is not.
fn assert_not_fatal(err: &EngineError) {
    assert!(
        !matches!(
            err,
            EngineError::InvariantViolation { .. } | EngineError::InternalError { .. }
        ),
        "fatal engine failure: {err}"
    );
}

async fn run_ops(ops: Vec<Op>) {
    let engine = engine();
    let pool = seeded_pool(&engine, 1_000_000).await;
    let mut outstanding: Vec<(String, Decimal)> = Vec::new();
    let mut seq = 0u32;

    for op in ops {
        let mut was_default = false;
        match op {
            Op::Allocate(amount) => {
                seq += 1;
                let advance_id = format!("adv-{seq}");
                match engine
                    .allocate_capital(allocation(pool.id, &advance_id, Decimal::from(amount)))
                    .await
                {
                    Ok(_) => outstanding.push((advance_id, Decimal::from(amount))),
                    Err(err) => assert_not_fatal(&err),
                }
            }
            Op::RepayNext { fees, penalties } => {
                if let Some((advance_id, amount)) = outstanding.pop() {
                    let mut req = repayment(
                        pool.id,
                        &advance_id,
                        ReleaseType::FullRepayment,
                        0,
                        fees as i64,
                        penalties as i64,
                    );
                    req.principal = amount;
                    engine.release_capital(req).await.expect("repayment of a live advance");
                }
            }
            Op::DefaultNext { recovered_pct } => {
                if let Some((advance_id, amount)) = outstanding.pop() {
                    was_default = true;
                    let recovered = percent_of(amount, Decimal::from(recovered_pct));
                    engine
                        .handle_default(&advance_id, pool.id, amount, recovered)
                        .await
                        .expect("default of a live advance");
                }
            }
            Op::Deposit(amount) => {
                engine
                    .deposit_capital(pool.id, Decimal::from(amount), "inv-prop")
                    .await
                    .expect("deposits always fit");
            }
            Op::Withdraw(amount) => {
                if let Err(err) =
                    engine.withdraw_capital(pool.id, Decimal::from(amount), "inv-prop").await
                {
                    assert_not_fatal(&err);
                }
            }
            Op::Interest(amount) => {
                engine
                    .distribute_interest(pool.id, Decimal::from(amount), "inv-prop")
                    .await
                    .expect("interest always fits");
            }
        }

        let state = engine.get_pool_details(pool.id).await.unwrap();
        // no bucket negative, capital equation intact
        assert!(
            state.capital_is_consistent(),
            "capital drifted: total {} available {} deployed {} reserved {}",
            state.total_capital,
            state.available_capital,
            state.deployed_capital,
            state.reserved_capital
        );
        // the reserve floor holds after every non-default commit
        if !was_default {
            assert!(
                state.available_capital >= state.required_reserve(),
                "reserve floor broken outside a default path: {} < {}",
                state.available_capital,
                state.required_reserve()
            );
        }
    }

    // conservation: the pool's committed capital equals the signed sum of
    // its ledger, because disbursements and holds only move capital
    // between buckets
    let state = engine.get_pool_details(pool.id).await.unwrap();
    let summary = engine
        .get_transaction_summary(TransactionFilter::for_pool(pool.id))
        .await
        .unwrap();
    assert_eq!(
        state.total_capital, summary.net_capital_change,
        "ledger does not account for the pool's capital"
    );
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, ..ProptestConfig::default() })]

    #[test]
    fn capital_is_conserved_under_arbitrary_operations(
        ops in proptest::collection::vec(op_strategy(), 1..24)
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime");
        rt.block_on(run_ops(ops));
    }
}
