//! The transaction engine: loads current state, runs the pure planners, and
//! persists their output inside one atomic scope.
//!
//! Every public operation is all-or-nothing. Contention aborts
//! (`TransactionAborted`) are retried a bounded number of times with the whole
//! operation re-planned from freshly loaded state; every other error
//! propagates to the caller unchanged, leaving no trace in the store.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;

use opsledger_core::{
    ActorId, EngineError, EngineResult, EntryId, Money, Quantity, SubjectId, TenantId,
};
use opsledger_finance::{
    FinancialTransaction, PaymentDetails, TransactionDraft, TransactionId, Transfer,
    plan_payment, plan_reversal, plan_transfer,
};
use opsledger_ledger::{
    EntryAmount, EntryFilter, EntryKind, EntryPage, LedgerEntry, NewEntry, ReconcileReport,
    Subject, project,
};
use opsledger_orders::{Order, OrderDraft, OrderId, OrderNumber, OrderStatus, plan_fulfillment};

use crate::store::{Datastore, StoreTx};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);
const MAX_PAGE_SIZE: usize = 500;

/// Multi-tenant transactional service over a [`Datastore`].
pub struct LedgerEngine<S> {
    store: S,
}

impl<S: Datastore> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` in an atomic scope, retrying contention aborts.
    ///
    /// The closure re-reads everything it needs on each attempt, so a retry
    /// plans against the state left by whichever scope won the conflict.
    fn run<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: Fn(&mut dyn StoreTx) -> EngineResult<T>,
    {
        let mut attempt = 1;
        loop {
            match self.store.transact(&f) {
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(%err, attempt, "atomic scope aborted, retrying");
                    thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Register a new subject (product or account) for a tenant.
    #[instrument(skip(self, subject), fields(tenant_id = %subject.tenant_id, subject_id = %subject.id))]
    pub fn register_subject(&self, subject: &Subject) -> EngineResult<()> {
        self.run(|tx| {
            if tx.subject(subject.tenant_id, subject.id)?.is_some() {
                return Err(EngineError::conflict(format!(
                    "subject {} already exists",
                    subject.id
                )));
            }
            tx.put_subject(subject)
        })
    }

    /// Create and fulfill an order: insert the document, append one OUT entry
    /// per stock-tracked line and move every touched product's on-hand value,
    /// all in one atomic scope.
    ///
    /// Any failure (unknown product, invalid line, insufficient stock) leaves
    /// no order, no entries and no stock change.
    #[instrument(skip(self, draft), fields(%tenant_id, %actor_id))]
    pub fn fulfill_order(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        draft: &OrderDraft,
    ) -> EngineResult<Order> {
        self.run(|tx| {
            let mut products: Vec<Subject> = Vec::new();
            for line in &draft.lines {
                if products.iter().any(|p| p.id == line.product_id) {
                    continue;
                }
                if let Some(subject) = tx.subject(tenant_id, line.product_id)? {
                    products.push(subject);
                }
            }

            let number = OrderNumber::new(tx.next_order_number(tenant_id)?);
            let plan = plan_fulfillment(tenant_id, actor_id, draft, &products, number, Utc::now())?;

            tx.insert_order(&plan.order)?;
            for entry in plan.entries {
                tx.append_entry(entry)?;
            }
            for subject in &plan.stock_updates {
                tx.put_subject(subject)?;
            }

            tracing::info!(order = %plan.order.number, total = %plan.order.total, "order fulfilled");
            Ok(plan.order)
        })
    }

    /// Apply a status transition to an order, stamping actual start/end dates.
    #[instrument(skip(self), fields(%tenant_id, order_id = %order_id, next = %next))]
    pub fn set_order_status(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> EngineResult<Order> {
        self.run(|tx| {
            let mut order = tx
                .order(tenant_id, order_id)?
                .ok_or_else(|| EngineError::not_found(format!("order {order_id}")))?;
            order.transition(next, Utc::now())?;
            tx.update_order(&order)?;
            Ok(order)
        })
    }

    /// Record a pending financial transaction. No money moves until payment.
    #[instrument(skip(self, draft), fields(%tenant_id, %actor_id))]
    pub fn record_transaction(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        draft: &TransactionDraft,
    ) -> EngineResult<FinancialTransaction> {
        self.run(|tx| {
            let account = tx
                .subject(tenant_id, draft.account_id)?
                .ok_or_else(|| EngineError::not_found(format!("account {}", draft.account_id)))?;
            if !account.is_account() {
                return Err(EngineError::invalid_argument(format!(
                    "subject {} is not a financial account",
                    account.id
                )));
            }

            let transaction = FinancialTransaction::from_draft(tenant_id, actor_id, draft, Utc::now())?;
            tx.insert_transaction(&transaction)?;
            Ok(transaction)
        })
    }

    /// Settle a pending transaction: append the ledger entry, move the account
    /// balance and mark the document paid, atomically.
    #[instrument(skip(self, details), fields(%tenant_id, %actor_id, transaction_id = %id))]
    pub fn pay_transaction(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        id: TransactionId,
        details: &PaymentDetails,
    ) -> EngineResult<FinancialTransaction> {
        self.run(|tx| {
            let transaction = tx
                .transaction(tenant_id, id)?
                .ok_or_else(|| EngineError::not_found(format!("transaction {id}")))?;
            let account = tx
                .subject(tenant_id, transaction.account_id)?
                .ok_or_else(|| {
                    EngineError::not_found(format!("account {}", transaction.account_id))
                })?;

            let plan = plan_payment(&transaction, &account, actor_id, details, Utc::now())?;
            tx.append_entry(plan.entry)?;
            tx.put_subject(&plan.account)?;
            tx.update_transaction(&plan.transaction)?;
            Ok(plan.transaction)
        })
    }

    /// Compensate a paid transaction: append an opposite-sign entry restoring
    /// the balance and move the document to the terminal `Reversed` state.
    /// The original entry is never touched.
    #[instrument(skip(self), fields(%tenant_id, %actor_id, transaction_id = %id))]
    pub fn reverse_transaction(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        id: TransactionId,
    ) -> EngineResult<FinancialTransaction> {
        self.run(|tx| {
            let transaction = tx
                .transaction(tenant_id, id)?
                .ok_or_else(|| EngineError::not_found(format!("transaction {id}")))?;
            let account = tx
                .subject(tenant_id, transaction.account_id)?
                .ok_or_else(|| {
                    EngineError::not_found(format!("account {}", transaction.account_id))
                })?;

            let plan = plan_reversal(&transaction, &account, actor_id, Utc::now())?;
            tx.append_entry(plan.entry)?;
            tx.put_subject(&plan.account)?;
            tx.update_transaction(&plan.transaction)?;
            Ok(plan.transaction)
        })
    }

    /// Move money between two accounts of the same tenant. The source pays
    /// `amount + fee`, the destination receives `amount`; both balances move
    /// in the same atomic scope or not at all.
    #[instrument(skip(self), fields(%tenant_id, %actor_id, %source_id, %dest_id))]
    pub fn transfer_funds(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        source_id: SubjectId,
        dest_id: SubjectId,
        amount: Money,
        fee: Money,
    ) -> EngineResult<Transfer> {
        self.run(|tx| {
            let source = tx
                .subject(tenant_id, source_id)?
                .ok_or_else(|| EngineError::not_found(format!("account {source_id}")))?;
            let dest = tx
                .subject(tenant_id, dest_id)?
                .ok_or_else(|| EngineError::not_found(format!("account {dest_id}")))?;

            let plan = plan_transfer(tenant_id, actor_id, &source, &dest, amount, fee, Utc::now())?;
            tx.insert_transfer(&plan.transfer)?;
            for entry in plan.entries {
                tx.append_entry(entry)?;
            }
            for subject in &plan.account_updates {
                tx.put_subject(subject)?;
            }
            Ok(plan.transfer)
        })
    }

    /// Set a tracked product's on-hand quantity to an absolute value,
    /// recording the difference as an `Adjustment` entry.
    ///
    /// The target must be non-negative and differ from the current quantity.
    #[instrument(skip(self), fields(%tenant_id, %actor_id, %product_id, new_quantity))]
    pub fn adjust_stock(
        &self,
        tenant_id: TenantId,
        actor_id: ActorId,
        product_id: SubjectId,
        new_quantity: Quantity,
        reason: &str,
    ) -> EngineResult<LedgerEntry> {
        self.run(|tx| {
            if new_quantity < 0 {
                return Err(EngineError::invalid_argument(
                    "adjusted quantity cannot be negative",
                ));
            }
            let subject = tx
                .subject(tenant_id, product_id)?
                .ok_or_else(|| EngineError::not_found(format!("product {product_id}")))?;
            let on_hand = subject.on_hand().ok_or_else(|| {
                EngineError::invalid_argument(format!("subject {product_id} is not a product"))
            })?;

            let delta = new_quantity - on_hand;
            if delta == 0 {
                return Err(EngineError::invalid_argument(
                    "stock is already at the requested quantity",
                ));
            }

            let previous_value = subject.value.as_amount();
            let mut subject = subject;
            subject.value = project(&subject, &EntryAmount::Units(delta))?;

            let stored = tx.append_entry(NewEntry {
                id: EntryId::new(),
                tenant_id,
                subject_id: product_id,
                kind: EntryKind::Adjustment,
                amount: EntryAmount::Units(delta),
                unit_cost: None,
                reason: reason.to_string(),
                document_id: None,
                actor_id,
                previous_value,
                new_value: subject.value.as_amount(),
                recorded_at: Utc::now(),
            })?;
            tx.put_subject(&subject)?;
            Ok(stored)
        })
    }

    /// Compare a subject's projected value against the signed sum of its
    /// ledger entries, optionally as of a point in time.
    #[instrument(skip(self), fields(%tenant_id, %subject_id))]
    pub fn reconcile(
        &self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<ReconcileReport> {
        self.run(|tx| {
            let subject = tx
                .subject(tenant_id, subject_id)?
                .ok_or_else(|| EngineError::not_found(format!("subject {subject_id}")))?;

            let projected = subject.value.as_amount();
            let zero = match projected {
                EntryAmount::Units(_) => EntryAmount::Units(0),
                EntryAmount::Money(_) => EntryAmount::Money(Money::ZERO),
            };
            let ledger_sum = tx.sum_for(tenant_id, subject_id, as_of)?.unwrap_or(zero);

            let report = ReconcileReport::new(subject_id, projected, ledger_sum);
            if !report.consistent {
                tracing::warn!(
                    projected = %report.projected,
                    ledger_sum = %report.ledger_sum,
                    "projection drifted from ledger sum"
                );
            }
            Ok(report)
        })
    }

    /// Page through a subject's entries, oldest first. `cursor` is the `seq`
    /// returned as `next` by the previous page; `limit` is clamped to 500
    /// entries per page.
    #[instrument(skip(self, filter), fields(%tenant_id, %subject_id))]
    pub fn ledger_entries(
        &self,
        tenant_id: TenantId,
        subject_id: SubjectId,
        filter: &EntryFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<EntryPage> {
        if limit == 0 {
            return Err(EngineError::invalid_argument("page limit must be positive"));
        }
        let limit = limit.min(MAX_PAGE_SIZE);
        self.run(|tx| {
            if tx.subject(tenant_id, subject_id)?.is_none() {
                return Err(EngineError::not_found(format!("subject {subject_id}")));
            }
            tx.entries_for(tenant_id, subject_id, filter, cursor, limit)
        })
    }
}
