//! Datastore abstraction: atomic scopes over documents, subjects and the
//! ledger.
//!
//! A `StoreTx` is one atomic scope. Implementations must guarantee that a
//! scope observing a subject's value holds that observation stable until
//! commit (row locks, optimistic version checks, or a coarse mutex), so two
//! concurrent scopes cannot both deduct past zero. Everything written through
//! a scope commits together or not at all.

use chrono::{DateTime, Utc};

use opsledger_core::{EngineResult, SubjectId, TenantId};
use opsledger_finance::{FinancialTransaction, Transfer, TransactionId, TransferId};
use opsledger_ledger::{EntryAmount, EntryFilter, EntryPage, LedgerEntry, NewEntry, Subject};
use opsledger_orders::{Order, OrderId};

/// One atomic scope. All reads see committed state plus this scope's own
/// writes; all writes are invisible to other scopes until commit.
pub trait StoreTx {
    // Subjects

    /// Load a subject, tenant-scoped. Foreign-tenant subjects are absent, not
    /// forbidden: the caller cannot distinguish them from missing rows.
    fn subject(&mut self, tenant_id: TenantId, id: SubjectId) -> EngineResult<Option<Subject>>;

    /// Insert or overwrite a subject. The engine only calls this with values
    /// produced by the balance projector.
    fn put_subject(&mut self, subject: &Subject) -> EngineResult<()>;

    // Ledger

    /// Append an immutable entry, assigning its insertion sequence.
    ///
    /// Fails `Conflict` when an entry with the same
    /// (document id, subject id, kind) tuple already exists for the tenant;
    /// this is the idempotency guard against duplicate retries. Entries
    /// without a document reference are exempt.
    fn append_entry(&mut self, entry: NewEntry) -> EngineResult<LedgerEntry>;

    /// Signed sum of a subject's entries, optionally bounded by time.
    /// Audit/reconciliation path; the hot path reads the projected value.
    /// `None` when the subject has no entries.
    fn sum_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<Option<EntryAmount>>;

    /// Page through a subject's entries, oldest first. `cursor` is the `seq`
    /// of the last entry already seen; sequences are assigned in commit
    /// order, so ascending `seq` is time order with insertion-id tie-break.
    fn entries_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        filter: &EntryFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<EntryPage>;

    // Documents

    /// Next value of the tenant-scoped order counter. Must be generated under
    /// the scope's isolation (locked counter row), never read-last-add-one.
    fn next_order_number(&mut self, tenant_id: TenantId) -> EngineResult<u64>;

    fn insert_order(&mut self, order: &Order) -> EngineResult<()>;
    fn order(&mut self, tenant_id: TenantId, id: OrderId) -> EngineResult<Option<Order>>;
    fn update_order(&mut self, order: &Order) -> EngineResult<()>;

    fn insert_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()>;
    fn transaction(
        &mut self,
        tenant_id: TenantId,
        id: TransactionId,
    ) -> EngineResult<Option<FinancialTransaction>>;
    fn update_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()>;

    fn insert_transfer(&mut self, transfer: &Transfer) -> EngineResult<()>;
    fn transfer(&mut self, tenant_id: TenantId, id: TransferId)
    -> EngineResult<Option<Transfer>>;
}

/// A datastore that can open atomic scopes.
pub trait Datastore: Send + Sync {
    /// Run `f` inside one atomic scope. An `Ok` return commits every write
    /// the closure made; an `Err` return rolls all of them back and
    /// propagates the error unchanged.
    ///
    /// Implementations surface serialization/contention failures as
    /// `TransactionAborted`, the one retryable error class.
    fn transact<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> EngineResult<T>;
}
