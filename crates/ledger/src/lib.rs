//! `opsledger-ledger`: append-only movement log and balance projection.
//!
//! The ledger is the source of truth for every quantity/value movement; the
//! denormalized current value on each subject is a projection that must equal
//! the signed sum of its entries whenever observed between transactions.

pub mod entry;
pub mod projector;
pub mod subject;

pub use entry::{EntryAmount, EntryFilter, EntryKind, EntryPage, LedgerEntry, NewEntry};
pub use projector::{ReconcileReport, project};
pub use subject::{Subject, SubjectValue};
