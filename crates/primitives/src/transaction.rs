//! Append-only ledger entries.

use crate::{PoolId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of a ledger entry.
///
/// The string forms are wire identifiers shared with the rest of the
/// platform and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Investor capital entering the pool.
    CapitalDeposit,
    /// Investor capital leaving the pool.
    CapitalWithdrawal,
    /// Principal disbursed to a farmer advance.
    AdvanceDisbursement,
    /// Principal returned by a repayment.
    AdvanceRepayment,
    /// Fee income recognized on repayment.
    FeeCollection,
    /// Interest earnings credited to the pool.
    InterestDistribution,
    /// Penalty income recognized on late repayment.
    PenaltyFee,
    /// Signed correction; default losses land here with a negative amount.
    Adjustment,
    /// Ledger-side reservation hold movement (fallback mode only).
    ReserveAllocation,
}

impl TransactionType {
    /// Signed contribution of this entry kind to `total_capital`.
    ///
    /// `Some(true)` adds, `Some(false)` subtracts, `None` moves capital
    /// between buckets without changing the total (`Adjustment` is signed by
    /// its amount instead).
    pub fn credits_total(&self) -> Option<bool> {
        match self {
            Self::CapitalDeposit
            | Self::AdvanceRepayment
            | Self::FeeCollection
            | Self::PenaltyFee
            | Self::InterestDistribution => Some(true),
            Self::CapitalWithdrawal => Some(false),
            Self::AdvanceDisbursement | Self::ReserveAllocation | Self::Adjustment => None,
        }
    }
}

/// A committed ledger entry. Never mutated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolTransaction {
    /// Public entry identifier.
    pub id: TransactionId,
    /// Per-pool monotonic sequence; defines the ledger order.
    pub seq: u64,
    /// Owning pool.
    pub pool_id: PoolId,
    /// Entry kind.
    #[serde(rename = "type")]
    pub txn_type: TransactionType,
    /// Amount. Positive except for signed [`TransactionType::Adjustment`]
    /// entries; direction otherwise lives in the type.
    pub amount: Decimal,
    /// Available capital before this entry.
    pub balance_before: Decimal,
    /// Available capital after this entry.
    pub balance_after: Decimal,
    /// Human-readable description.
    pub description: String,
    /// Opaque structured context (advance ids, fee breakdowns, …).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    /// Advance this entry belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_advance_id: Option<String>,
    /// Investor this entry belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_investor_id: Option<String>,
    /// Commit timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_strings_are_wire_compatible() {
        for (ty, s) in [
            (TransactionType::CapitalDeposit, "CAPITAL_DEPOSIT"),
            (TransactionType::CapitalWithdrawal, "CAPITAL_WITHDRAWAL"),
            (TransactionType::AdvanceDisbursement, "ADVANCE_DISBURSEMENT"),
            (TransactionType::AdvanceRepayment, "ADVANCE_REPAYMENT"),
            (TransactionType::FeeCollection, "FEE_COLLECTION"),
            (TransactionType::InterestDistribution, "INTEREST_DISTRIBUTION"),
            (TransactionType::PenaltyFee, "PENALTY_FEE"),
            (TransactionType::Adjustment, "ADJUSTMENT"),
            (TransactionType::ReserveAllocation, "RESERVE_ALLOCATION"),
        ] {
            assert_eq!(ty.to_string(), s);
            assert_eq!(s.parse::<TransactionType>().unwrap(), ty);
        }
    }
}
