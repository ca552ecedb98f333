//! Operational counters.
//!
//! Recorded through the `metrics` facade; a deployment installs whatever
//! recorder it exports through. No recorder means the calls are no-ops.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Engine-level operation counters.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EngineMetrics;

impl EngineMetrics {
    pub(crate) fn allocation_committed(&self, amount: Decimal) {
        metrics::counter!("agrocap_allocations_total", 1);
        metrics::counter!(
            "agrocap_allocated_amount_total",
            amount.to_u64().unwrap_or_default()
        );
    }

    pub(crate) fn allocation_failed(&self, code: &'static str) {
        metrics::counter!("agrocap_allocation_failures_total", 1, "code" => code);
    }

    pub(crate) fn release_committed(&self) {
        metrics::counter!("agrocap_releases_total", 1);
    }

    pub(crate) fn default_recognized(&self, loss: Decimal) {
        metrics::counter!("agrocap_defaults_total", 1);
        metrics::counter!(
            "agrocap_default_losses_total",
            loss.to_u64().unwrap_or_default()
        );
    }

    pub(crate) fn reservation_created(&self) {
        metrics::counter!("agrocap_reservations_created_total", 1);
    }

    pub(crate) fn reservation_settled(&self, outcome: &'static str) {
        metrics::counter!("agrocap_reservations_settled_total", 1, "outcome" => outcome);
    }

    pub(crate) fn commit_retried(&self) {
        metrics::counter!("agrocap_commit_retries_total", 1);
    }

    pub(crate) fn lock_contended(&self) {
        metrics::counter!("agrocap_lock_contention_total", 1);
    }

    pub(crate) fn snapshot_cache(&self, hit: bool) {
        let outcome = if hit { "hit" } else { "miss" };
        metrics::counter!("agrocap_snapshot_reads_total", 1, "cache" => outcome);
    }
}
