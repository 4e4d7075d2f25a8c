//! `opsledger-engine`: the transactional service tying documents, ledger
//! entries and balance projection together under one atomic scope.
//!
//! The engine owns orchestration only; business decisions live in the pure
//! planners of the orders/finance crates and the ledger projector. Stores
//! provide the atomic scope: every multi-step operation runs inside a single
//! `Datastore::transact` call and either commits whole or leaves no trace.

pub mod engine;
pub mod memory;
pub mod store;

pub use engine::LedgerEngine;
pub use memory::InMemoryStore;
pub use store::{Datastore, StoreTx};
