#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Ledger storage for the agrocap capital engine.
//!
//! This crate defines the [`LedgerStore`] trait — durable pool rows plus an
//! append-only transaction log with atomic, invariant-guarded balance
//! mutations — and ships [`MemoryLedger`], the in-memory reference backend
//! used in tests and single-process embeddings.
//!
//! Balance mutations are *declarative*: callers describe signed capital and
//! counter deltas, the guards to re-check under the row lock, and the ledger
//! records to append ([`BalanceChange`]). The store applies the whole change
//! inside one critical section and refuses to commit anything that would
//! leave a capital bucket negative or break the capital equation
//! `total = available + deployed + reserved`.

mod traits;
pub use traits::{
    BalanceChange, CapitalDelta, CommittedChange, CounterDelta, LedgerStore, NewTransaction,
    PoolConfigUpdate, PoolFilter, TransactionFilter, TransactionSummary,
};

mod error;
pub use error::{StoreError, StoreResult};

mod memory;
pub use memory::MemoryLedger;
