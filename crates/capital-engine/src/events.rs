//! Balance-change event payloads.
//!
//! Events serialize to the JSON shape the rest of the platform consumes;
//! field names and enum strings are wire identifiers.

use agrocap_primitives::{BalanceSnapshot, PoolId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What kind of change an event announces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceChangeKind {
    /// Durable capital moved.
    BalanceChanged,
    /// A hold was placed.
    ReservationCreated,
    /// A hold was released (explicitly or by TTL expiry).
    ReservationReleased,
    /// A default loss pushed the pool under its reserve floor.
    HealthWarning,
}

/// Entity an event relates to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelatedEntityType {
    /// An advance.
    Advance,
    /// An investor.
    Investor,
    /// A ledger adjustment.
    Adjustment,
}

/// Capital position carried inside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceFigures {
    /// Committed capital.
    pub total_capital: Decimal,
    /// Deployable capital before reserve and holds.
    pub available_capital: Decimal,
    /// Capital outstanding in advances.
    pub deployed_capital: Decimal,
    /// Ledger-side holds.
    pub reserved_capital: Decimal,
    /// Deployable capital right now.
    pub effective_available: Decimal,
    /// `deployed / total` in percent.
    pub utilization_rate: Decimal,
    /// `available / total` in percent.
    pub reserve_ratio: Decimal,
    /// When the figures were computed.
    pub timestamp: DateTime<Utc>,
}

impl From<&BalanceSnapshot> for BalanceFigures {
    fn from(snapshot: &BalanceSnapshot) -> Self {
        Self {
            total_capital: snapshot.total_capital,
            available_capital: snapshot.available_capital,
            deployed_capital: snapshot.deployed_capital,
            reserved_capital: snapshot.reserved_capital,
            effective_available: snapshot.effective_available,
            utilization_rate: snapshot.utilization_rate,
            reserve_ratio: snapshot.reserve_ratio,
            timestamp: snapshot.timestamp,
        }
    }
}

/// A published balance-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEvent {
    /// Pool the change happened on.
    pub pool_id: PoolId,
    /// Change kind.
    pub change_type: BalanceChangeKind,
    /// Magnitude of the change.
    pub amount: Decimal,
    /// Position before the change.
    pub balance_before: BalanceFigures,
    /// Position after the change.
    pub balance_after: BalanceFigures,
    /// Related entity id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    /// Related entity kind, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<RelatedEntityType>,
    /// When the change committed.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_wire_field_names() {
        let now = Utc::now();
        let figures = BalanceFigures {
            total_capital: Decimal::from(100),
            available_capital: Decimal::from(60),
            deployed_capital: Decimal::from(40),
            reserved_capital: Decimal::ZERO,
            effective_available: Decimal::from(45),
            utilization_rate: Decimal::from(40),
            reserve_ratio: Decimal::from(60),
            timestamp: now,
        };
        let event = BalanceEvent {
            pool_id: PoolId::random(),
            change_type: BalanceChangeKind::BalanceChanged,
            amount: Decimal::from(40),
            balance_before: figures.clone(),
            balance_after: figures,
            related_entity_id: Some("adv-1".to_owned()),
            related_entity_type: Some(RelatedEntityType::Advance),
            timestamp: now,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["changeType"], "BALANCE_CHANGED");
        assert_eq!(json["relatedEntityType"], "ADVANCE");
        assert!(json["balanceBefore"]["effectiveAvailable"].is_string());
        assert!(json["balanceAfter"]["utilizationRate"].is_string());
    }
}
