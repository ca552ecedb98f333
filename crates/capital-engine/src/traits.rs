//! The caller-facing engine trait and its request/result types.

use crate::{
    error::EngineResult,
    listener::BalanceEvents,
    validate::EligibilityReport,
};
use agrocap_primitives::{
    AllocationPriority, BalanceSnapshot, Pool, PoolId, PoolTransaction, Reservation,
    ReservationId, RiskTier, TransactionId,
};
use agrocap_storage::{
    CapitalDelta, PoolConfigUpdate, PoolFilter, TransactionFilter, TransactionSummary,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Request to fund an advance from a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    /// Advance being funded.
    pub advance_id: String,
    /// Farmer receiving the disbursement.
    pub farmer_id: String,
    /// Produce order backing the advance.
    pub order_id: String,
    /// Principal requested.
    pub requested_amount: Decimal,
    /// Currency of the advance.
    pub currency: String,
    /// Risk tier of the advance; selects the fee table row.
    pub risk_tier: RiskTier,
    /// Underwriting credit score, carried into the ledger metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_score: Option<u32>,
    /// Pin the allocation to one pool instead of selecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_pool_id: Option<PoolId>,
    /// Selection strategy when no pool is pinned.
    #[serde(default)]
    pub priority: AllocationPriority,
}

/// Fees charged on a disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    /// Charged to the farmer.
    pub farmer_fee: Decimal,
    /// Charged to the produce buyer.
    pub buyer_fee: Decimal,
}

impl FeeBreakdown {
    /// Combined fee amount.
    pub fn total(&self) -> Decimal {
        self.farmer_fee + self.buyer_fee
    }
}

/// Outcome of a successful allocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    /// Pool the advance was funded from.
    pub pool_id: PoolId,
    /// The disbursement ledger entry.
    pub transaction_id: TransactionId,
    /// Disbursed principal.
    pub amount: Decimal,
    /// Fee breakdown applied.
    pub fees: FeeBreakdown,
    /// Available capital before the commit.
    pub balance_before: Decimal,
    /// Available capital after the commit.
    pub balance_after: Decimal,
    /// Commit timestamp.
    pub allocated_at: DateTime<Utc>,
}

/// Shape of a capital release.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseType {
    /// Part of the principal came back.
    PartialRepayment,
    /// The advance is fully repaid; completion counters move.
    FullRepayment,
    /// Recovery arriving after the advance was written off.
    DefaultRecovery,
    /// Manual correction.
    Adjustment,
}

/// Where the released money came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseSource {
    /// The produce buyer paid.
    BuyerPayment,
    /// The farmer paid directly.
    FarmerPayment,
    /// An insurance payout.
    Insurance,
    /// The collections process.
    Collections,
    /// Anything else.
    Other,
}

/// Request to return capital to a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    /// Pool the capital returns to.
    pub pool_id: PoolId,
    /// Advance the repayment belongs to.
    pub advance_id: String,
    /// Farmer the advance was issued to.
    pub farmer_id: String,
    /// Release shape.
    pub release_type: ReleaseType,
    /// Payment origin.
    pub source: ReleaseSource,
    /// Returned principal.
    pub principal: Decimal,
    /// Fee income recognized with this release.
    #[serde(default)]
    pub fees: Decimal,
    /// Penalty income recognized with this release.
    #[serde(default)]
    pub penalties: Decimal,
}

/// Outcome of a committed release or capital movement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    /// Affected pool.
    pub pool_id: PoolId,
    /// Primary ledger entry of the movement.
    pub transaction_id: TransactionId,
    /// Moved amount.
    pub amount: Decimal,
    /// Available capital before the commit.
    pub balance_before: Decimal,
    /// Available capital after the commit.
    pub balance_after: Decimal,
    /// Commit timestamp.
    pub committed_at: DateTime<Utc>,
}

/// Outcome of recognizing a default loss.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultOutcome {
    /// Affected pool.
    pub pool_id: PoolId,
    /// The write-off adjustment entry.
    pub transaction_id: TransactionId,
    /// Unrecovered loss.
    pub loss: Decimal,
    /// Recovered amount returned to available capital.
    pub recovered: Decimal,
    /// Pool default rate after recognition.
    pub default_rate: Decimal,
}

/// Request to place a two-phase hold on pool capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    /// Pool to hold capital in.
    pub pool_id: PoolId,
    /// Advance being underwritten.
    pub advance_id: String,
    /// Farmer the advance is for.
    pub farmer_id: String,
    /// Amount to hold.
    pub amount: Decimal,
    /// Override of the configured TTL, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

/// Input to create a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    /// Pool name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Pool currency.
    pub currency: String,
    /// Risk classification.
    pub risk_tier: RiskTier,
    /// Committed capital; becomes the opening deposit.
    pub initial_capital: Decimal,
    /// Target return in percent.
    pub target_return_rate: Decimal,
    /// Overrides the configured minimum advance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_advance_amount: Option<Decimal>,
    /// Overrides the configured maximum advance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_advance_amount: Option<Decimal>,
    /// Single-borrower exposure ceiling; defaults to the initial capital.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_exposure_limit: Option<Decimal>,
    /// Overrides the configured reserve floor percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_reserve_ratio: Option<Decimal>,
    /// Whether the rebalancer may touch this pool.
    #[serde(default)]
    pub auto_rebalance_enabled: bool,
    /// Principal creating the pool.
    pub created_by: String,
}

/// Aggregate view across every pool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolsSummary {
    /// Number of pools.
    pub pool_count: u64,
    /// Sum of committed capital.
    pub total_capital: Decimal,
    /// Sum of available capital.
    pub available_capital: Decimal,
    /// Sum of deployed capital.
    pub deployed_capital: Decimal,
    /// Sum of ledger-side holds.
    pub reserved_capital: Decimal,
    /// Mean utilization across pools, in percent.
    pub average_utilization: Decimal,
    /// Mean default rate across pools, in percent.
    pub average_default_rate: Decimal,
    /// Pool counts by status (wire status strings).
    pub by_status: HashMap<String, u64>,
    /// Pool counts by risk tier.
    pub by_tier: HashMap<String, u64>,
    /// When the summary was computed.
    pub timestamp: DateTime<Utc>,
}

/// Performance metrics over one pool and date range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Pool under review.
    pub pool_id: PoolId,
    /// Period start (inclusive).
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive).
    pub period_end: DateTime<Utc>,
    /// Principal disbursed in the period.
    pub total_disbursed: Decimal,
    /// Principal repaid in the period.
    pub total_repaid: Decimal,
    /// Fee, penalty and interest income in the period.
    pub total_fees: Decimal,
    /// Write-off losses in the period.
    pub total_losses: Decimal,
    /// Disbursement count in the period.
    pub advances_disbursed: u64,
    /// Mean disbursement size.
    pub average_advance: Decimal,
    /// Lifetime completion rate, in percent.
    pub completion_rate: Decimal,
    /// Lifetime default rate, in percent.
    pub default_rate: Decimal,
    /// `(fees − losses) / disbursed` in percent.
    pub profit_margin: Decimal,
    /// Annualized return on committed capital, in percent.
    pub annualized_roi: Decimal,
    /// The five largest farmer exposures.
    pub top_farmer_exposures: Vec<FarmerExposure>,
    /// Share of deployed capital held by the top five farmers, in percent.
    pub concentration_pct: Decimal,
}

/// One farmer's outstanding exposure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmerExposure {
    /// Farmer identifier.
    pub farmer_id: String,
    /// Outstanding disbursed principal.
    pub amount: Decimal,
}

/// Overall health classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Score ≥ 70.
    Healthy,
    /// Score ≥ 40.
    Warning,
    /// Anything lower.
    Critical,
}

/// Weighted health assessment of one pool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Assessed pool.
    pub pool_id: PoolId,
    /// Weighted 0–100 score.
    pub score: Decimal,
    /// Classification derived from the score.
    pub status: HealthStatus,
    /// Reserve-coverage subscore.
    pub liquidity: Decimal,
    /// Default-rate subscore.
    pub performance: Decimal,
    /// Borrower-concentration subscore.
    pub concentration: Decimal,
    /// Activity subscore.
    pub activity: Decimal,
    /// Human-readable findings (threshold breaches).
    pub flags: Vec<String>,
}

/// One entry of a multi-pool balance adjustment.
#[derive(Debug, Clone)]
pub struct PoolBalanceUpdate {
    /// Pool to adjust.
    pub pool_id: PoolId,
    /// Signed capital deltas; must conserve the capital equation.
    pub delta: CapitalDelta,
    /// Ledger description of the adjustment.
    pub description: String,
}

/// The capital engine's caller-facing API.
///
/// Implemented by [`PoolEngine`](crate::PoolEngine); exposed as a trait so
/// transports and tests can wrap or mock the engine.
#[async_trait::async_trait]
pub trait CapitalEngine: Send + Sync {
    /// Funds an advance, selecting a pool if none is pinned.
    async fn allocate_capital(&self, req: AllocationRequest) -> EngineResult<AllocationResult>;

    /// Returns repaid capital (plus fees and penalties) to a pool.
    async fn release_capital(&self, req: ReleaseRequest) -> EngineResult<LedgerReceipt>;

    /// Recognizes a default loss, best-effort reserve.
    async fn handle_default(
        &self,
        advance_id: &str,
        pool_id: PoolId,
        defaulted_amount: Decimal,
        recovered_amount: Decimal,
    ) -> EngineResult<DefaultOutcome>;

    /// Places a two-phase hold on pool capital.
    async fn create_reservation(&self, req: ReservationRequest) -> EngineResult<Reservation>;

    /// Converts a hold into a deployment; idempotent. Returns the held
    /// amount.
    async fn commit_reservation(&self, id: ReservationId) -> EngineResult<Decimal>;

    /// Cancels a hold. Returns the released amount.
    async fn release_reservation(&self, id: ReservationId) -> EngineResult<Decimal>;

    /// Current balance view of one pool, cache-first.
    async fn get_balance(&self, pool_id: PoolId) -> EngineResult<BalanceSnapshot>;

    /// Balance views of several pools with one cache multi-get and at most
    /// one store read. Unknown ids are skipped.
    async fn get_balances(&self, pool_ids: &[PoolId]) -> EngineResult<Vec<BalanceSnapshot>>;

    /// Aggregate across every pool; cached briefly.
    async fn get_summary(&self) -> EngineResult<PoolsSummary>;

    /// Performance metrics over a date range.
    async fn get_performance(
        &self,
        pool_id: PoolId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<PerformanceReport>;

    /// Weighted health assessment.
    async fn assess_health(&self, pool_id: PoolId) -> EngineResult<HealthReport>;

    /// Creates a pool with its opening deposit.
    async fn create_pool(&self, req: CreatePoolRequest) -> EngineResult<Pool>;

    /// Applies a configuration-only update.
    async fn update_pool(&self, pool_id: PoolId, update: PoolConfigUpdate) -> EngineResult<Pool>;

    /// Filtered pool listing.
    async fn list_pools(&self, filter: PoolFilter) -> EngineResult<Vec<Pool>>;

    /// One pool's full row.
    async fn get_pool_details(&self, pool_id: PoolId) -> EngineResult<Pool>;

    /// Read-only probe of the funding constraints for an amount.
    async fn check_advance_eligibility(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        tier: RiskTier,
    ) -> EngineResult<EligibilityReport>;

    /// Filtered ledger read.
    async fn get_transactions(
        &self,
        filter: TransactionFilter,
    ) -> EngineResult<Vec<PoolTransaction>>;

    /// Aggregate over matching ledger entries.
    async fn get_transaction_summary(
        &self,
        filter: TransactionFilter,
    ) -> EngineResult<TransactionSummary>;

    /// Credits investor capital to a pool.
    async fn deposit_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt>;

    /// Withdraws investor capital; the reserve floor must keep holding.
    async fn withdraw_capital(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt>;

    /// Credits interest earnings to a pool.
    async fn distribute_interest(
        &self,
        pool_id: PoolId,
        amount: Decimal,
        investor_id: &str,
    ) -> EngineResult<LedgerReceipt>;

    /// Multi-pool balance adjustment; atomic mode commits all-or-nothing.
    async fn batch_update_balances(
        &self,
        updates: Vec<PoolBalanceUpdate>,
        atomic: bool,
    ) -> EngineResult<Vec<EngineResult<LedgerReceipt>>>;

    /// Subscribes to balance events of one pool.
    fn subscribe(&self, pool_id: PoolId) -> BalanceEvents;

    /// Subscribes to balance events of every pool.
    fn subscribe_all(&self) -> BalanceEvents;
}
