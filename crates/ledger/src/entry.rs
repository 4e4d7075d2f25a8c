//! Immutable ledger entries.
//!
//! Entries are created exactly once per movement, inside the same atomic scope
//! as the subject's value update, and are never mutated or deleted afterwards.
//! Corrections append a compensating entry of the opposite sign.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opsledger_core::{
    ActorId, DocumentId, EngineError, EngineResult, EntryId, Money, Quantity, SubjectId, TenantId,
};

/// Movement classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    In,
    Out,
    Adjustment,
    TransferOut,
    TransferIn,
}

impl core::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            EntryKind::In => "in",
            EntryKind::Out => "out",
            EntryKind::Adjustment => "adjustment",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::TransferIn => "transfer_in",
        };
        f.write_str(s)
    }
}

/// Signed movement amount: whole units for stock, fixed-point for money.
///
/// The variant must match the subject's value kind; mixing them is rejected by
/// the projector before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryAmount {
    Units(Quantity),
    Money(Money),
}

impl EntryAmount {
    pub fn is_zero(&self) -> bool {
        match self {
            EntryAmount::Units(q) => *q == 0,
            EntryAmount::Money(m) => m.is_zero(),
        }
    }

    /// Compensating amount for a reversal entry.
    pub fn negated(&self) -> EntryAmount {
        match self {
            EntryAmount::Units(q) => EntryAmount::Units(-q),
            EntryAmount::Money(m) => EntryAmount::Money(-*m),
        }
    }

    /// Sum two amounts of the same kind.
    pub fn checked_add(&self, other: &EntryAmount) -> EngineResult<EntryAmount> {
        match (self, other) {
            (EntryAmount::Units(a), EntryAmount::Units(b)) => Ok(EntryAmount::Units(a + b)),
            (EntryAmount::Money(a), EntryAmount::Money(b)) => Ok(EntryAmount::Money(*a + *b)),
            _ => Err(EngineError::invalid_argument(
                "cannot sum unit and money amounts",
            )),
        }
    }
}

impl core::fmt::Display for EntryAmount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryAmount::Units(q) => write!(f, "{q}"),
            EntryAmount::Money(m) => write!(f, "{m}"),
        }
    }
}

/// An entry that has not been persisted yet (no insertion sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub subject_id: SubjectId,
    pub kind: EntryKind,
    pub amount: EntryAmount,
    /// Unit cost at movement time (stock subjects only).
    pub unit_cost: Option<Money>,
    pub reason: String,
    /// Business document that caused this movement, if any. Entries carrying a
    /// document reference are subject to the duplicate-append guard.
    pub document_id: Option<DocumentId>,
    pub actor_id: ActorId,
    /// Subject value snapshots taken inside the same atomic scope.
    pub previous_value: EntryAmount,
    pub new_value: EntryAmount,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted, immutable ledger entry.
///
/// `seq` is a store-assigned insertion sequence used as the tie-breaker in
/// time ordering and as the paging cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub subject_id: SubjectId,
    pub kind: EntryKind,
    pub amount: EntryAmount,
    pub unit_cost: Option<Money>,
    pub reason: String,
    pub document_id: Option<DocumentId>,
    pub actor_id: ActorId,
    pub previous_value: EntryAmount,
    pub new_value: EntryAmount,
    pub recorded_at: DateTime<Utc>,
    pub seq: u64,
}

impl NewEntry {
    pub fn into_stored(self, seq: u64) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            subject_id: self.subject_id,
            kind: self.kind,
            amount: self.amount,
            unit_cost: self.unit_cost,
            reason: self.reason,
            document_id: self.document_id,
            actor_id: self.actor_id,
            previous_value: self.previous_value,
            new_value: self.new_value,
            recorded_at: self.recorded_at,
            seq,
        }
    }
}

/// Filters for listing a subject's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub kind: Option<EntryKind>,
    pub document_id: Option<DocumentId>,
    pub recorded_after: Option<DateTime<Utc>>,
    pub recorded_before: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(doc) = self.document_id {
            if entry.document_id != Some(doc) {
                return false;
            }
        }
        if let Some(after) = self.recorded_after {
            if entry.recorded_at < after {
                return false;
            }
        }
        if let Some(before) = self.recorded_before {
            if entry.recorded_at > before {
                return false;
            }
        }
        true
    }
}

/// One page of a subject's entries, oldest first, ties broken by `seq`.
///
/// `next` is the cursor to pass back for the following page; `None` means the
/// sequence is exhausted at the time of the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    pub next: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(kind: EntryKind, document_id: Option<DocumentId>) -> LedgerEntry {
        NewEntry {
            id: EntryId::new(),
            tenant_id: TenantId::new(),
            subject_id: SubjectId::new(),
            kind,
            amount: EntryAmount::Units(-3),
            unit_cost: Some(Money::from_major(25)),
            reason: "order fulfillment".to_string(),
            document_id,
            actor_id: ActorId::new(),
            previous_value: EntryAmount::Units(5),
            new_value: EntryAmount::Units(2),
            recorded_at: Utc::now(),
        }
        .into_stored(1)
    }

    #[test]
    fn filter_matches_kind_and_document() {
        let doc = DocumentId::new();
        let entry = sample_entry(EntryKind::Out, Some(doc));

        assert!(EntryFilter::default().matches(&entry));
        assert!(
            EntryFilter {
                kind: Some(EntryKind::Out),
                document_id: Some(doc),
                ..Default::default()
            }
            .matches(&entry)
        );
        assert!(
            !EntryFilter {
                kind: Some(EntryKind::In),
                ..Default::default()
            }
            .matches(&entry)
        );
        assert!(
            !EntryFilter {
                document_id: Some(DocumentId::new()),
                ..Default::default()
            }
            .matches(&entry)
        );
    }

    #[test]
    fn amounts_of_mixed_kinds_do_not_sum() {
        let units = EntryAmount::Units(4);
        let money = EntryAmount::Money(Money::from_major(4));
        assert!(units.checked_add(&money).is_err());
        assert_eq!(
            units.checked_add(&EntryAmount::Units(-1)).unwrap(),
            EntryAmount::Units(3)
        );
    }

    #[test]
    fn negated_flips_sign() {
        assert_eq!(EntryAmount::Units(-3).negated(), EntryAmount::Units(3));
        assert_eq!(
            EntryAmount::Money(Money::from_major(7)).negated(),
            EntryAmount::Money(Money::from_major(-7))
        );
    }
}
