//! Order document: header, line items, totals, status lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use opsledger_core::{ActorId, DocumentId, EngineError, EngineResult, Money, Quantity, SubjectId, TenantId};

/// Order identifier (tenant-scoped via `tenant_id` on the document).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub DocumentId);

impl OrderId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle.
///
/// Legal transitions:
/// `Pending → InProgress → {Paused → InProgress, Completed, Cancelled}`,
/// plus `Cancelled → Pending` as the only re-entry. Everything else fails
/// `InvalidTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Paused)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (Paused, InProgress)
                | (Cancelled, Pending)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Paused => "paused",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Discount applied at line or order level; the same branch computes both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discount {
    Percentage(Decimal),
    Fixed(Money),
}

impl Discount {
    /// The discount value for a given subtotal.
    pub fn value_of(&self, subtotal: Money) -> Money {
        match self {
            Discount::Percentage(pct) => subtotal.percent(*pct),
            Discount::Fixed(amount) => *amount,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Discount::Percentage(pct) => {
                if *pct < Decimal::ZERO || *pct > Decimal::ONE_HUNDRED {
                    return Err(EngineError::invalid_argument(
                        "percentage discount must be between 0 and 100",
                    ));
                }
            }
            Discount::Fixed(amount) => {
                if amount.is_negative() {
                    return Err(EngineError::invalid_argument(
                        "fixed discount cannot be negative",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Human-readable sequential order number, monotonically increasing per
/// tenant. Generated from a locked tenant-scoped counter inside the same
/// atomic scope as the order insert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(u64);

impl OrderNumber {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ORD-{:06}", self.0)
    }
}

/// Caller's intent for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub product_id: SubjectId,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub discount: Option<Discount>,
}

/// Caller's intent for a whole order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub lines: Vec<LineDraft>,
    pub discount: Option<Discount>,
    pub note: Option<String>,
}

/// Persisted order line with computed amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: SubjectId,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub subtotal: Money,
    pub discount_value: Money,
    pub total: Money,
}

impl OrderLine {
    /// Compute a line from its draft: `subtotal = price * qty`,
    /// `total = subtotal - discount`.
    pub fn compute(line_no: u32, draft: &LineDraft) -> EngineResult<OrderLine> {
        if draft.quantity <= 0 {
            return Err(EngineError::invalid_argument(format!(
                "line {line_no}: quantity must be positive"
            )));
        }
        if draft.unit_price.is_negative() {
            return Err(EngineError::invalid_argument(format!(
                "line {line_no}: unit price cannot be negative"
            )));
        }

        let subtotal = draft.unit_price.times(draft.quantity);
        let discount_value = match &draft.discount {
            Some(d) => {
                d.validate()?;
                d.value_of(subtotal)
            }
            None => Money::ZERO,
        };
        let total = subtotal - discount_value;
        if total.is_negative() {
            return Err(EngineError::invalid_argument(format!(
                "line {line_no}: discount exceeds subtotal"
            )));
        }

        Ok(OrderLine {
            line_no,
            product_id: draft.product_id,
            quantity: draft.quantity,
            unit_price: draft.unit_price,
            subtotal,
            discount_value,
            total,
        })
    }
}

/// Order document: header + lines + computed totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub number: OrderNumber,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub discount_value: Money,
    pub total: Money,
    pub note: Option<String>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
}

impl Order {
    /// Apply a status transition, stamping actual start/end dates.
    ///
    /// Entering `InProgress` for the first time stamps `actual_start`;
    /// entering `Completed` stamps `actual_end`.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == OrderStatus::InProgress && self.actual_start.is_none() {
            self.actual_start = Some(now);
        }
        if next == OrderStatus::Completed {
            self.actual_end = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Orders can no longer be edited once completed or cancelled.
    pub fn is_editable(&self) -> bool {
        !matches!(self.status, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Orders can no longer be deleted once work has started.
    pub fn is_deletable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }
}
