//! Account-to-account transfers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opsledger_core::{ActorId, DocumentId, EngineError, EngineResult, EntryId, Money, SubjectId, TenantId};
use opsledger_ledger::{EntryAmount, EntryKind, NewEntry, Subject, project};

/// Transfer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub DocumentId);

impl TransferId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer document. The fee stays on the source side: the source pays
/// `amount + fee`, the destination receives `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub tenant_id: TenantId,
    pub source_account: SubjectId,
    pub dest_account: SubjectId,
    pub amount: Money,
    pub fee: Money,
    pub recorded_at: DateTime<Utc>,
    pub created_by: ActorId,
}

/// Everything `transfer_funds` must persist, atomically.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub transfer: Transfer,
    /// TransferOut on the source, then TransferIn on the destination.
    pub entries: Vec<NewEntry>,
    pub account_updates: Vec<Subject>,
}

/// Validate and compute a transfer between two accounts of the same tenant.
///
/// Requires distinct, active accounts and
/// `source.balance + source.credit_limit >= amount + fee` (enforced by the
/// projector). Both balances move inside the same atomic scope.
pub fn plan_transfer(
    tenant_id: TenantId,
    actor_id: ActorId,
    source: &Subject,
    dest: &Subject,
    amount: Money,
    fee: Money,
    now: DateTime<Utc>,
) -> EngineResult<TransferPlan> {
    if !amount.is_positive() {
        return Err(EngineError::invalid_argument(
            "transfer amount must be positive",
        ));
    }
    if fee.is_negative() {
        return Err(EngineError::invalid_argument(
            "transfer fee cannot be negative",
        ));
    }
    if source.id == dest.id {
        return Err(EngineError::invalid_argument(
            "source and destination accounts must differ",
        ));
    }
    if !source.is_account() || !dest.is_account() {
        return Err(EngineError::invalid_argument(
            "transfers require financial accounts",
        ));
    }

    let transfer = Transfer {
        id: TransferId::new(DocumentId::new()),
        tenant_id,
        source_account: source.id,
        dest_account: dest.id,
        amount,
        fee,
        recorded_at: now,
        created_by: actor_id,
    };

    let out_delta = EntryAmount::Money(-(amount + fee));
    let source_previous = source.value.as_amount();
    let mut source = source.clone();
    source.value = project(&source, &out_delta)?;

    let in_delta = EntryAmount::Money(amount);
    let dest_previous = dest.value.as_amount();
    let mut dest = dest.clone();
    dest.value = project(&dest, &in_delta)?;

    let entries = vec![
        NewEntry {
            id: EntryId::new(),
            tenant_id,
            subject_id: source.id,
            kind: EntryKind::TransferOut,
            amount: out_delta,
            unit_cost: None,
            reason: format!("transfer to account {}", dest.id),
            document_id: Some(transfer.id.0),
            actor_id,
            previous_value: source_previous,
            new_value: source.value.as_amount(),
            recorded_at: now,
        },
        NewEntry {
            id: EntryId::new(),
            tenant_id,
            subject_id: dest.id,
            kind: EntryKind::TransferIn,
            amount: in_delta,
            unit_cost: None,
            reason: format!("transfer from account {}", source.id),
            document_id: Some(transfer.id.0),
            actor_id,
            previous_value: dest_previous,
            new_value: dest.value.as_amount(),
            recorded_at: now,
        },
    ];

    Ok(TransferPlan {
        transfer,
        entries,
        account_updates: vec![source, dest],
    })
}
