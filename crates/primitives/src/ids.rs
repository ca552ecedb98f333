//! Opaque identifiers for pools, reservations and ledger entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing uuid.
            pub const fn new(inner: Uuid) -> Self {
                Self(inner)
            }

            /// Returns the wrapped uuid.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(inner: Uuid) -> Self {
                Self(inner)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a capital pool.
    ///
    /// Ordered lexicographically; the allocation tie-breaker and the batch
    /// lock-acquisition order both rely on this ordering being total.
    PoolId
);

uuid_id!(
    /// Identifier of a capital reservation (two-phase hold).
    ReservationId
);

uuid_id!(
    /// Public identifier of a ledger entry.
    ///
    /// Entries additionally carry a per-pool monotonic sequence number that
    /// defines the total order of the pool's ledger.
    TransactionId
);
