//! In-memory datastore.
//!
//! Intended for tests/dev. One coarse mutex serializes scopes (trivially
//! serializable isolation); rollback restores a snapshot taken at scope
//! start. Not optimized for performance.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use opsledger_core::{DocumentId, EngineError, EngineResult, SubjectId, TenantId};
use opsledger_finance::{FinancialTransaction, Transfer, TransactionId, TransferId};
use opsledger_ledger::{
    EntryAmount, EntryFilter, EntryKind, EntryPage, LedgerEntry, NewEntry, Subject,
};
use opsledger_orders::{Order, OrderId};

use crate::store::{Datastore, StoreTx};

#[derive(Debug, Clone, Default)]
struct State {
    subjects: HashMap<(TenantId, SubjectId), Subject>,
    /// Global append order; `seq` == position + 1.
    entries: Vec<LedgerEntry>,
    /// Idempotency guard: one entry per (document, subject, kind) per tenant.
    entry_keys: HashSet<(TenantId, DocumentId, SubjectId, EntryKind)>,
    orders: HashMap<(TenantId, OrderId), Order>,
    transactions: HashMap<(TenantId, TransactionId), FinancialTransaction>,
    transfers: HashMap<(TenantId, TransferId), Transfer>,
    order_counters: HashMap<TenantId, u64>,
}

/// In-memory implementation of [`Datastore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One atomic scope over the in-memory state. The store mutex is held for the
/// scope's whole lifetime, so isolation is serial by construction.
pub struct MemoryTx<'a> {
    state: &'a mut State,
}

impl Datastore for InMemoryStore {
    fn transact<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> EngineResult<T>,
    {
        let mut guard = self.state.lock().map_err(|_| {
            tracing::error!("in-memory store mutex poisoned");
            EngineError::Internal
        })?;

        let snapshot = guard.clone();
        let result = {
            let mut tx = MemoryTx { state: &mut *guard };
            f(&mut tx)
        };
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                *guard = snapshot;
                Err(err)
            }
        }
    }
}

impl StoreTx for MemoryTx<'_> {
    fn subject(&mut self, tenant_id: TenantId, id: SubjectId) -> EngineResult<Option<Subject>> {
        Ok(self.state.subjects.get(&(tenant_id, id)).cloned())
    }

    fn put_subject(&mut self, subject: &Subject) -> EngineResult<()> {
        self.state
            .subjects
            .insert((subject.tenant_id, subject.id), subject.clone());
        Ok(())
    }

    fn append_entry(&mut self, entry: NewEntry) -> EngineResult<LedgerEntry> {
        if let Some(document_id) = entry.document_id {
            let key = (entry.tenant_id, document_id, entry.subject_id, entry.kind);
            if !self.state.entry_keys.insert(key) {
                return Err(EngineError::conflict(format!(
                    "ledger entry for document {document_id}, subject {}, kind {} already exists",
                    entry.subject_id, entry.kind
                )));
            }
        }

        let seq = self.state.entries.len() as u64 + 1;
        let stored = entry.into_stored(seq);
        self.state.entries.push(stored.clone());
        Ok(stored)
    }

    fn sum_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<Option<EntryAmount>> {
        let mut sum: Option<EntryAmount> = None;
        for entry in &self.state.entries {
            if entry.tenant_id != tenant_id || entry.subject_id != subject_id {
                continue;
            }
            if let Some(bound) = as_of {
                if entry.recorded_at > bound {
                    continue;
                }
            }
            sum = Some(match sum {
                Some(acc) => acc.checked_add(&entry.amount)?,
                None => entry.amount,
            });
        }
        Ok(sum)
    }

    fn entries_for(
        &mut self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        filter: &EntryFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<EntryPage> {
        let after = cursor.unwrap_or(0);
        let mut entries: Vec<LedgerEntry> = self
            .state
            .entries
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.subject_id == subject_id
                    && e.seq > after
                    && filter.matches(e)
            })
            .take(limit.saturating_add(1))
            .cloned()
            .collect();

        let next = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|e| e.seq)
        } else {
            None
        };

        Ok(EntryPage { entries, next })
    }

    fn next_order_number(&mut self, tenant_id: TenantId) -> EngineResult<u64> {
        let counter = self.state.order_counters.entry(tenant_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn insert_order(&mut self, order: &Order) -> EngineResult<()> {
        let key = (order.tenant_id, order.id);
        if self.state.orders.contains_key(&key) {
            return Err(EngineError::conflict(format!(
                "order {} already exists",
                order.id
            )));
        }
        self.state.orders.insert(key, order.clone());
        Ok(())
    }

    fn order(&mut self, tenant_id: TenantId, id: OrderId) -> EngineResult<Option<Order>> {
        Ok(self.state.orders.get(&(tenant_id, id)).cloned())
    }

    fn update_order(&mut self, order: &Order) -> EngineResult<()> {
        let key = (order.tenant_id, order.id);
        match self.state.orders.get_mut(&key) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(EngineError::not_found(format!("order {}", order.id))),
        }
    }

    fn insert_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()> {
        let key = (transaction.tenant_id, transaction.id);
        if self.state.transactions.contains_key(&key) {
            return Err(EngineError::conflict(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        self.state.transactions.insert(key, transaction.clone());
        Ok(())
    }

    fn transaction(
        &mut self,
        tenant_id: TenantId,
        id: TransactionId,
    ) -> EngineResult<Option<FinancialTransaction>> {
        Ok(self.state.transactions.get(&(tenant_id, id)).cloned())
    }

    fn update_transaction(&mut self, transaction: &FinancialTransaction) -> EngineResult<()> {
        let key = (transaction.tenant_id, transaction.id);
        match self.state.transactions.get_mut(&key) {
            Some(existing) => {
                *existing = transaction.clone();
                Ok(())
            }
            None => Err(EngineError::not_found(format!(
                "transaction {}",
                transaction.id
            ))),
        }
    }

    fn insert_transfer(&mut self, transfer: &Transfer) -> EngineResult<()> {
        let key = (transfer.tenant_id, transfer.id);
        if self.state.transfers.contains_key(&key) {
            return Err(EngineError::conflict(format!(
                "transfer {} already exists",
                transfer.id
            )));
        }
        self.state.transfers.insert(key, transfer.clone());
        Ok(())
    }

    fn transfer(
        &mut self,
        tenant_id: TenantId,
        id: TransferId,
    ) -> EngineResult<Option<Transfer>> {
        Ok(self.state.transfers.get(&(tenant_id, id)).cloned())
    }
}
