//! The ledger-store trait and its mutation vocabulary.

use crate::StoreResult;
use agrocap_primitives::{
    Pool, PoolId, PoolStatus, PoolTransaction, RiskTier, TransactionType,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Filter for pool listings.
#[derive(Debug, Clone, Default)]
pub struct PoolFilter {
    /// Restrict to one lifecycle status.
    pub status: Option<PoolStatus>,
    /// Restrict to one currency.
    pub currency: Option<String>,
    /// Restrict to one risk tier.
    pub risk_tier: Option<RiskTier>,
    /// Restrict to an explicit id set.
    pub ids: Option<Vec<PoolId>>,
}

impl PoolFilter {
    /// Filter matching only active pools in `currency`.
    pub fn active_in_currency(currency: impl Into<String>) -> Self {
        Self {
            status: Some(PoolStatus::Active),
            currency: Some(currency.into()),
            ..Default::default()
        }
    }

    /// Whether `pool` passes this filter.
    pub fn matches(&self, pool: &Pool) -> bool {
        self.status.map_or(true, |s| pool.status == s)
            && self.currency.as_deref().map_or(true, |c| pool.currency == c)
            && self.risk_tier.map_or(true, |t| pool.risk_tier == t)
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&pool.id))
    }
}

/// Signed deltas over the four capital buckets.
///
/// A change conserves capital iff
/// `total == available + deployed + reserved`; the store rejects anything
/// else before touching the row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapitalDelta {
    /// Change to `total_capital`.
    pub total: Decimal,
    /// Change to `available_capital`.
    pub available: Decimal,
    /// Change to `deployed_capital`.
    pub deployed: Decimal,
    /// Change to `reserved_capital`.
    pub reserved: Decimal,
}

impl CapitalDelta {
    /// Whether the deltas keep the capital equation intact.
    pub fn conserves_capital(&self) -> bool {
        self.available + self.deployed + self.reserved == self.total
    }
}

/// Signed deltas over the advance counters and running totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    /// Advances issued.
    pub issued: u64,
    /// Advances completed.
    pub completed: u64,
    /// Advances defaulted.
    pub defaulted: u64,
    /// Net change to active advances (may be negative).
    pub active: i64,
    /// Principal disbursed.
    pub disbursed: Decimal,
    /// Principal repaid.
    pub repaid: Decimal,
    /// Fees and penalties earned.
    pub fees_earned: Decimal,
    /// Recompute `default_rate` from the updated counters.
    pub recompute_default_rate: bool,
}

/// A ledger record to append as part of a [`BalanceChange`].
///
/// `balance_before`/`balance_after` are assigned by the store by chaining
/// `available_effect` over the records of the change, starting from the
/// pool's available capital before the change.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Entry kind.
    pub txn_type: TransactionType,
    /// Entry amount (signed only for `ADJUSTMENT`).
    pub amount: Decimal,
    /// Signed effect of this entry on available capital; the effects of all
    /// records in a change must sum to the change's available delta.
    pub available_effect: Decimal,
    /// Human-readable description.
    pub description: String,
    /// Opaque structured context.
    pub metadata: serde_json::Value,
    /// Advance this entry belongs to, if any.
    pub related_advance_id: Option<String>,
    /// Investor this entry belongs to, if any.
    pub related_investor_id: Option<String>,
}

impl NewTransaction {
    /// A record whose available-capital effect equals its amount.
    pub fn crediting(txn_type: TransactionType, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            txn_type,
            amount,
            available_effect: amount,
            description: description.into(),
            metadata: serde_json::Value::Null,
            related_advance_id: None,
            related_investor_id: None,
        }
    }

    /// A record that moves `amount` out of available capital.
    pub fn debiting(txn_type: TransactionType, amount: Decimal, description: impl Into<String>) -> Self {
        Self {
            available_effect: -amount,
            ..Self::crediting(txn_type, amount, description)
        }
    }

    /// Attaches structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Links the record to an advance.
    pub fn for_advance(mut self, advance_id: impl Into<String>) -> Self {
        self.related_advance_id = Some(advance_id.into());
        self
    }

    /// Links the record to an investor.
    pub fn for_investor(mut self, investor_id: impl Into<String>) -> Self {
        self.related_investor_id = Some(investor_id.into());
        self
    }
}

/// An atomic, guarded mutation of one pool row plus its appended records.
///
/// Applied entirely inside the pool's row lock. Guards (`require_status`,
/// `enforce_reserve_floor`) are re-checked against the *current* row, not
/// the row the caller previously read; a failed guard aborts with
/// [`StoreError::ConcurrentMutation`](crate::StoreError). Non-negativity and
/// the capital equation are always enforced and abort with
/// [`StoreError::InvariantViolation`](crate::StoreError).
#[derive(Debug, Clone)]
pub struct BalanceChange {
    /// Pool to mutate.
    pub pool_id: PoolId,
    /// Capital deltas.
    pub capital: CapitalDelta,
    /// Counter deltas.
    pub counters: CounterDelta,
    /// Abort unless the row currently has this status.
    pub require_status: Option<PoolStatus>,
    /// Re-check the reserve floor on the resulting row. Every path sets
    /// this except default-loss recognition.
    pub enforce_reserve_floor: bool,
    /// Stamp `last_allocation_at` (round-robin selection marker).
    pub mark_allocation: bool,
    /// Signed change to one farmer's outstanding exposure.
    pub farmer_exposure: Option<(String, Decimal)>,
    /// Records to append, in order.
    pub records: Vec<NewTransaction>,
}

impl BalanceChange {
    /// A change with no deltas and no records for `pool_id`.
    pub fn for_pool(pool_id: PoolId) -> Self {
        Self {
            pool_id,
            capital: CapitalDelta::default(),
            counters: CounterDelta::default(),
            require_status: None,
            enforce_reserve_floor: true,
            mark_allocation: false,
            farmer_exposure: None,
            records: Vec::new(),
        }
    }
}

/// The outcome of a committed [`BalanceChange`].
#[derive(Debug, Clone)]
pub struct CommittedChange {
    /// Row as it was when the lock was taken.
    pub before: Pool,
    /// Row as committed.
    pub after: Pool,
    /// Appended records with assigned ids, sequence numbers and balances.
    pub records: Vec<PoolTransaction>,
}

/// Configuration-only pool update. Never touches capital.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<Option<String>>,
    /// New lifecycle status.
    pub status: Option<PoolStatus>,
    /// New target return rate.
    pub target_return_rate: Option<Decimal>,
    /// New minimum advance amount.
    pub min_advance_amount: Option<Decimal>,
    /// New maximum advance amount.
    pub max_advance_amount: Option<Decimal>,
    /// New single-borrower exposure ceiling.
    pub max_exposure_limit: Option<Decimal>,
    /// New reserve floor percentage.
    pub min_reserve_ratio: Option<Decimal>,
    /// Toggle auto-rebalancing.
    pub auto_rebalance_enabled: Option<bool>,
}

/// Filter for ledger queries.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Restrict to one pool.
    pub pool_id: Option<PoolId>,
    /// Restrict to these entry kinds (empty = all).
    pub types: Vec<TransactionType>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    /// Restrict to one advance.
    pub related_advance_id: Option<String>,
    /// Cap the number of returned entries (newest first).
    pub limit: Option<usize>,
}

impl TransactionFilter {
    /// All entries of one pool.
    pub fn for_pool(pool_id: PoolId) -> Self {
        Self { pool_id: Some(pool_id), ..Default::default() }
    }

    /// Whether `txn` passes this filter.
    pub fn matches(&self, txn: &PoolTransaction) -> bool {
        self.pool_id.map_or(true, |id| txn.pool_id == id)
            && (self.types.is_empty() || self.types.contains(&txn.txn_type))
            && self.from.map_or(true, |from| txn.created_at >= from)
            && self.to.map_or(true, |to| txn.created_at < to)
            && self
                .related_advance_id
                .as_deref()
                .map_or(true, |a| txn.related_advance_id.as_deref() == Some(a))
    }
}

/// Aggregate over a set of ledger entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionSummary {
    /// Matched entry count.
    pub count: u64,
    /// Sum of amounts per entry kind.
    pub totals: HashMap<TransactionType, Decimal>,
    /// Net signed effect on total capital across the matched entries.
    pub net_capital_change: Decimal,
}

/// Durable pool state plus the append-only transaction log.
///
/// Implementations must execute [`commit`](Self::commit) under a row-level
/// exclusive lock with at least repeatable-read semantics and surface
/// conflicting guard failures as
/// [`StoreError::ConcurrentMutation`](crate::StoreError) so the engine can
/// retry.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Creates a pool row together with its opening deposit record in one
    /// transaction.
    async fn insert_pool(&self, pool: Pool, opening: NewTransaction) -> StoreResult<Pool>;

    /// Non-locking read of one pool.
    async fn pool(&self, id: PoolId) -> StoreResult<Pool>;

    /// Non-locking filtered listing.
    async fn pools(&self, filter: &PoolFilter) -> StoreResult<Vec<Pool>>;

    /// Applies a configuration-only update and returns the new row.
    async fn update_pool_config(
        &self,
        id: PoolId,
        update: PoolConfigUpdate,
    ) -> StoreResult<Pool>;

    /// Applies one guarded balance change atomically.
    async fn commit(&self, change: BalanceChange) -> StoreResult<CommittedChange>;

    /// Applies several changes. In atomic mode all changes commit in one
    /// storage transaction, acquiring row locks in ascending pool-id order;
    /// a single failure rolls back everything. In non-atomic mode each
    /// change commits independently and the result vector carries the
    /// per-change outcomes.
    async fn commit_batch(
        &self,
        changes: Vec<BalanceChange>,
        atomic: bool,
    ) -> StoreResult<Vec<StoreResult<CommittedChange>>>;

    /// Filtered ledger read, newest entries first.
    async fn transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<PoolTransaction>>;

    /// Aggregate over the matching ledger entries.
    async fn transaction_summary(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<TransactionSummary>;

    /// One farmer's outstanding exposure in a pool.
    async fn farmer_exposure(&self, pool_id: PoolId, farmer_id: &str) -> StoreResult<Decimal>;

    /// The `limit` largest farmer exposures in a pool, descending.
    async fn top_farmer_exposures(
        &self,
        pool_id: PoolId,
        limit: usize,
    ) -> StoreResult<Vec<(String, Decimal)>>;
}
