//! Order fulfillment planner.
//!
//! Pure decision step: given the draft and the current state of every
//! referenced product, produce the order document, the OUT ledger entries and
//! the projected stock values. The engine executes the plan inside a single
//! atomic scope; nothing here performs IO.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use opsledger_core::{
    ActorId, DocumentId, EngineError, EngineResult, EntryId, Money, Quantity, SubjectId, TenantId,
};
use opsledger_ledger::{EntryAmount, EntryKind, NewEntry, Subject, project};

use crate::order::{Order, OrderDraft, OrderId, OrderLine, OrderNumber, OrderStatus};

/// Everything `fulfill_order` must persist, atomically.
#[derive(Debug, Clone)]
pub struct FulfillmentPlan {
    pub order: Order,
    pub entries: Vec<NewEntry>,
    /// Final projected state of every stock-tracked product the order touches.
    pub stock_updates: Vec<Subject>,
}

/// Validate the draft against current product state and compute the plan.
///
/// `products` must contain every product referenced by the draft, already
/// tenant-scoped by the caller. Fails without side effects:
/// - missing product → `NotFound`
/// - non-product subject → `InvalidArgument`
/// - tracked product with insufficient stock → `InsufficientStock` naming the
///   offending product, even when earlier lines would have succeeded
pub fn plan_fulfillment(
    tenant_id: TenantId,
    actor_id: ActorId,
    draft: &OrderDraft,
    products: &[Subject],
    number: OrderNumber,
    now: DateTime<Utc>,
) -> EngineResult<FulfillmentPlan> {
    if draft.lines.is_empty() {
        return Err(EngineError::invalid_argument("order has no lines"));
    }

    // Working copies: consecutive lines for the same product must deduct
    // cumulatively, not each against the original snapshot.
    let mut working: HashMap<_, _> = products
        .iter()
        .map(|p| (p.id, p.clone()))
        .collect();

    let mut lines = Vec::with_capacity(draft.lines.len());
    for (idx, line_draft) in draft.lines.iter().enumerate() {
        let line = OrderLine::compute(idx as u32 + 1, line_draft)?;
        let product = working
            .get(&line_draft.product_id)
            .ok_or_else(|| EngineError::not_found(format!("product {}", line_draft.product_id)))?;
        if !product.is_stock() {
            return Err(EngineError::invalid_argument(format!(
                "subject {} is not a product",
                product.id
            )));
        }
        lines.push(line);
    }

    let subtotal: Money = lines.iter().map(|l| l.total).sum();
    let discount_value = match &draft.discount {
        Some(d) => {
            d.validate()?;
            d.value_of(subtotal)
        }
        None => Money::ZERO,
    };
    let total = subtotal - discount_value;
    if total.is_negative() {
        return Err(EngineError::invalid_argument(
            "order discount exceeds subtotal",
        ));
    }

    let order = Order {
        id: OrderId::new(DocumentId::new()),
        tenant_id,
        number,
        status: OrderStatus::Pending,
        lines,
        subtotal,
        discount_value,
        total,
        note: draft.note.clone(),
        actual_start: None,
        actual_end: None,
        created_at: now,
        created_by: actor_id,
    };

    // One OUT entry per tracked product: repeated lines for the same product
    // coalesce, since the append guard admits a single entry per
    // (document, subject, kind) tuple. Each line still projects individually
    // so an oversubscribing line fails with the true running availability.
    struct Deduction {
        product_id: SubjectId,
        quantity: Quantity,
        /// `None` when lines for the product disagree on price.
        unit_cost: Option<Money>,
        previous_value: EntryAmount,
    }

    let mut deductions: Vec<Deduction> = Vec::new();
    for line in &order.lines {
        let product = working
            .get_mut(&line.product_id)
            .ok_or_else(|| EngineError::not_found(format!("product {}", line.product_id)))?;
        if !product.tracks_ledger() {
            continue;
        }

        let previous_value = product.value.as_amount();
        product.value = project(product, &EntryAmount::Units(-line.quantity))?;

        match deductions
            .iter_mut()
            .find(|d| d.product_id == line.product_id)
        {
            Some(deduction) => {
                deduction.quantity += line.quantity;
                if deduction.unit_cost != Some(line.unit_price) {
                    deduction.unit_cost = None;
                }
            }
            None => deductions.push(Deduction {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_cost: Some(line.unit_price),
                previous_value,
            }),
        }
    }

    let mut entries = Vec::with_capacity(deductions.len());
    let mut stock_updates = Vec::with_capacity(deductions.len());
    for deduction in deductions {
        let product = working
            .remove(&deduction.product_id)
            .ok_or_else(|| EngineError::not_found(format!("product {}", deduction.product_id)))?;

        entries.push(NewEntry {
            id: EntryId::new(),
            tenant_id,
            subject_id: deduction.product_id,
            kind: EntryKind::Out,
            amount: EntryAmount::Units(-deduction.quantity),
            unit_cost: deduction.unit_cost,
            reason: format!("fulfillment of order {number}"),
            document_id: Some(order.id.0),
            actor_id,
            previous_value: deduction.previous_value,
            new_value: product.value.as_amount(),
            recorded_at: now,
        });
        stock_updates.push(product);
    }

    Ok(FulfillmentPlan {
        order,
        entries,
        stock_updates,
    })
}
