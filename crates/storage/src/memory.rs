//! In-memory ledger backend.
//!
//! Reference implementation of [`LedgerStore`]: a `BTreeMap` of pool rows,
//! each guarded by its own async mutex standing in for a row-level
//! `SELECT … FOR UPDATE`. Used by tests and single-process embeddings.

use crate::{
    BalanceChange, CommittedChange, LedgerStore, NewTransaction, PoolConfigUpdate, PoolFilter,
    StoreError, StoreResult, TransactionFilter, TransactionSummary,
};
use agrocap_primitives::{Pool, PoolId, PoolTransaction, TransactionId, TransactionType};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::trace;

/// Everything the ledger knows about one pool.
#[derive(Debug, Clone)]
struct PoolRecord {
    pool: Pool,
    /// Append-only; `seq` of the next entry is `next_seq`.
    log: Vec<PoolTransaction>,
    next_seq: u64,
    /// Outstanding disbursed principal per farmer.
    farmer_exposure: HashMap<String, Decimal>,
}

/// In-memory [`LedgerStore`] backend.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    pools: parking_lot::RwLock<BTreeMap<PoolId, Arc<Mutex<PoolRecord>>>>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, id: PoolId) -> StoreResult<Arc<Mutex<PoolRecord>>> {
        self.pools.read().get(&id).cloned().ok_or(StoreError::PoolNotFound(id))
    }

    fn cells_ascending(&self, ids: &[PoolId]) -> StoreResult<Vec<(PoolId, Arc<Mutex<PoolRecord>>)>> {
        let pools = self.pools.read();
        ids.iter()
            .sorted()
            .dedup()
            .map(|id| {
                pools
                    .get(id)
                    .cloned()
                    .map(|cell| (*id, cell))
                    .ok_or(StoreError::PoolNotFound(*id))
            })
            .collect()
    }
}

/// Applies `change` to a copy of `record`, enforcing guards and invariants.
///
/// Pure with respect to the store: the caller decides whether the returned
/// record replaces the current one (single commits always do, atomic batches
/// only once every change in the batch has validated).
fn apply_change(
    record: &PoolRecord,
    change: &BalanceChange,
    now: DateTime<Utc>,
) -> StoreResult<(PoolRecord, CommittedChange)> {
    let pool_id = change.pool_id;
    let before = record.pool.clone();

    if !change.capital.conserves_capital() {
        return Err(StoreError::InvariantViolation {
            pool_id,
            reason: format!(
                "unbalanced capital delta: total {} != available {} + deployed {} + reserved {}",
                change.capital.total,
                change.capital.available,
                change.capital.deployed,
                change.capital.reserved
            ),
        });
    }

    let effects: Decimal = change.records.iter().map(|r| r.available_effect).sum();
    if effects != change.capital.available {
        return Err(StoreError::InvariantViolation {
            pool_id,
            reason: format!(
                "record effects {effects} do not match available delta {}",
                change.capital.available
            ),
        });
    }

    if let Some(required) = change.require_status {
        if before.status != required {
            return Err(StoreError::ConcurrentMutation {
                pool_id,
                reason: format!("status is {}, expected {required}", before.status),
            });
        }
    }

    let mut after = before.clone();
    after.total_capital += change.capital.total;
    after.available_capital += change.capital.available;
    after.deployed_capital += change.capital.deployed;
    after.reserved_capital += change.capital.reserved;

    after.counters.issued += change.counters.issued;
    after.counters.completed += change.counters.completed;
    after.counters.defaulted += change.counters.defaulted;
    after.counters.active = after
        .counters
        .active
        .checked_add_signed(change.counters.active)
        .ok_or_else(|| StoreError::InvariantViolation {
            pool_id,
            reason: "active advance counter would go negative".to_owned(),
        })?;
    after.total_disbursed += change.counters.disbursed;
    after.total_repaid += change.counters.repaid;
    after.total_fees_earned += change.counters.fees_earned;
    if change.counters.recompute_default_rate {
        after.recompute_default_rate();
    }
    if change.mark_allocation {
        after.last_allocation_at = Some(now);
    }
    after.updated_at = now;

    if !after.capital_is_consistent() {
        let reason = [
            ("totalCapital", after.total_capital),
            ("availableCapital", after.available_capital),
            ("deployedCapital", after.deployed_capital),
            ("reservedCapital", after.reserved_capital),
        ]
        .iter()
        .find(|(_, v)| *v < Decimal::ZERO)
        .map(|(name, v)| format!("{name} would become {v}"))
        .unwrap_or_else(|| "capital equation broken".to_owned());
        return Err(StoreError::InvariantViolation { pool_id, reason });
    }

    if change.enforce_reserve_floor && after.available_capital < after.required_reserve() {
        return Err(StoreError::ConcurrentMutation {
            pool_id,
            reason: format!(
                "available {} would drop below required reserve {}",
                after.available_capital,
                after.required_reserve()
            ),
        });
    }

    let mut next_seq = record.next_seq;
    let mut running = before.available_capital;
    let mut appended = Vec::with_capacity(change.records.len());
    for new in &change.records {
        let balance_before = running;
        running += new.available_effect;
        appended.push(PoolTransaction {
            id: TransactionId::random(),
            seq: next_seq,
            pool_id,
            txn_type: new.txn_type,
            amount: new.amount,
            balance_before,
            balance_after: running,
            description: new.description.clone(),
            metadata: new.metadata.clone(),
            related_advance_id: new.related_advance_id.clone(),
            related_investor_id: new.related_investor_id.clone(),
            created_at: now,
        });
        next_seq += 1;
    }

    let mut farmer_exposure = record.farmer_exposure.clone();
    if let Some((farmer, delta)) = &change.farmer_exposure {
        let entry = farmer_exposure.entry(farmer.clone()).or_insert(Decimal::ZERO);
        *entry = (*entry + delta).max(Decimal::ZERO);
        if entry.is_zero() {
            farmer_exposure.remove(farmer);
        }
    }

    let mut log = record.log.clone();
    log.extend(appended.iter().cloned());

    trace!(
        target: "storage::memory",
        pool = %pool_id,
        records = appended.len(),
        available = %after.available_capital,
        "committed balance change"
    );

    Ok((
        PoolRecord { pool: after.clone(), log, next_seq, farmer_exposure },
        CommittedChange { before, after, records: appended },
    ))
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_pool(&self, pool: Pool, opening: NewTransaction) -> StoreResult<Pool> {
        if !pool.capital_is_consistent() {
            return Err(StoreError::InvariantViolation {
                pool_id: pool.id,
                reason: "initial capital buckets are inconsistent".to_owned(),
            });
        }
        let now = Utc::now();
        let record = PoolTransaction {
            id: TransactionId::random(),
            seq: 1,
            pool_id: pool.id,
            txn_type: opening.txn_type,
            amount: opening.amount,
            balance_before: pool.available_capital - opening.available_effect,
            balance_after: pool.available_capital,
            description: opening.description,
            metadata: opening.metadata,
            related_advance_id: opening.related_advance_id,
            related_investor_id: opening.related_investor_id,
            created_at: now,
        };

        let mut pools = self.pools.write();
        if pools.contains_key(&pool.id) {
            return Err(StoreError::PoolAlreadyExists(pool.id));
        }
        pools.insert(
            pool.id,
            Arc::new(Mutex::new(PoolRecord {
                pool: pool.clone(),
                log: vec![record],
                next_seq: 2,
                farmer_exposure: HashMap::new(),
            })),
        );
        Ok(pool)
    }

    async fn pool(&self, id: PoolId) -> StoreResult<Pool> {
        let cell = self.cell(id)?;
        let record = cell.lock().await;
        Ok(record.pool.clone())
    }

    async fn pools(&self, filter: &PoolFilter) -> StoreResult<Vec<Pool>> {
        let cells: Vec<_> = self.pools.read().values().cloned().collect();
        let mut out = Vec::new();
        for cell in cells {
            let record = cell.lock().await;
            if filter.matches(&record.pool) {
                out.push(record.pool.clone());
            }
        }
        Ok(out)
    }

    async fn update_pool_config(
        &self,
        id: PoolId,
        update: PoolConfigUpdate,
    ) -> StoreResult<Pool> {
        let cell = self.cell(id)?;
        let mut record = cell.lock().await;
        let pool = &mut record.pool;
        if let Some(name) = update.name {
            pool.name = name;
        }
        if let Some(description) = update.description {
            pool.description = description;
        }
        if let Some(status) = update.status {
            pool.status = status;
        }
        if let Some(rate) = update.target_return_rate {
            pool.target_return_rate = rate;
        }
        if let Some(min) = update.min_advance_amount {
            pool.min_advance_amount = min;
        }
        if let Some(max) = update.max_advance_amount {
            pool.max_advance_amount = max;
        }
        if let Some(limit) = update.max_exposure_limit {
            pool.max_exposure_limit = limit;
        }
        if let Some(ratio) = update.min_reserve_ratio {
            pool.min_reserve_ratio = ratio;
        }
        if let Some(enabled) = update.auto_rebalance_enabled {
            pool.auto_rebalance_enabled = enabled;
        }
        pool.updated_at = Utc::now();
        Ok(pool.clone())
    }

    async fn commit(&self, change: BalanceChange) -> StoreResult<CommittedChange> {
        let cell = self.cell(change.pool_id)?;
        let mut record = cell.lock().await;
        let (next, committed) = apply_change(&record, &change, Utc::now())?;
        *record = next;
        Ok(committed)
    }

    async fn commit_batch(
        &self,
        changes: Vec<BalanceChange>,
        atomic: bool,
    ) -> StoreResult<Vec<StoreResult<CommittedChange>>> {
        if !atomic {
            let mut outcomes = Vec::with_capacity(changes.len());
            for change in changes {
                outcomes.push(self.commit(change).await);
            }
            return Ok(outcomes);
        }

        // Atomic mode: take every row lock in ascending pool-id order, stage
        // all changes against working copies, and only then write back.
        let ids: Vec<_> = changes.iter().map(|c| c.pool_id).collect();
        let cells = self.cells_ascending(&ids)?;
        let mut guards = BTreeMap::new();
        for (id, cell) in cells {
            guards.insert(id, cell.lock_owned().await);
        }

        let now = Utc::now();
        let mut staged: BTreeMap<PoolId, PoolRecord> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(changes.len());
        for change in &changes {
            let current = staged
                .get(&change.pool_id)
                .cloned()
                .unwrap_or_else(|| (*guards[&change.pool_id]).clone());
            let (next, committed) = apply_change(&current, change, now)?;
            staged.insert(change.pool_id, next);
            outcomes.push(committed);
        }
        for (id, record) in staged {
            **guards.get_mut(&id).expect("locked above") = record;
        }
        Ok(outcomes.into_iter().map(Ok).collect())
    }

    async fn transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<PoolTransaction>> {
        let cells: Vec<_> = match filter.pool_id {
            Some(id) => vec![self.cell(id)?],
            None => self.pools.read().values().cloned().collect(),
        };
        let mut out = Vec::new();
        for cell in cells {
            let record = cell.lock().await;
            out.extend(record.log.iter().filter(|t| filter.matches(t)).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn transaction_summary(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<TransactionSummary> {
        let filter = TransactionFilter { limit: None, ..filter.clone() };
        let mut summary = TransactionSummary::default();
        for txn in self.transactions(&filter).await? {
            summary.count += 1;
            *summary.totals.entry(txn.txn_type).or_insert(Decimal::ZERO) += txn.amount;
            summary.net_capital_change += match txn.txn_type {
                TransactionType::Adjustment => txn.amount,
                ty => match ty.credits_total() {
                    Some(true) => txn.amount,
                    Some(false) => -txn.amount,
                    None => Decimal::ZERO,
                },
            };
        }
        Ok(summary)
    }

    async fn farmer_exposure(&self, pool_id: PoolId, farmer_id: &str) -> StoreResult<Decimal> {
        let cell = self.cell(pool_id)?;
        let record = cell.lock().await;
        Ok(record.farmer_exposure.get(farmer_id).copied().unwrap_or(Decimal::ZERO))
    }

    async fn top_farmer_exposures(
        &self,
        pool_id: PoolId,
        limit: usize,
    ) -> StoreResult<Vec<(String, Decimal)>> {
        let cell = self.cell(pool_id)?;
        let record = cell.lock().await;
        Ok(record
            .farmer_exposure
            .iter()
            .map(|(farmer, amount)| (farmer.clone(), *amount))
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(limit)
            .collect())
    }
}
