//! Balance projector: the single code path through which a subject's
//! denormalized value may change.
//!
//! `project` is pure; the caller applies the returned value inside the same
//! atomic scope that appends the corresponding ledger entry. Direct field
//! writes anywhere else in the system are a correctness bug.

use serde::{Deserialize, Serialize};

use opsledger_core::{EngineError, EngineResult, SubjectId};

use crate::entry::EntryAmount;
use crate::subject::{Subject, SubjectValue};

/// Compute the subject's new value after applying a signed movement.
///
/// Failure modes:
/// - tracked stock below zero → `InsufficientStock`
/// - account below `-credit_limit` → `InsufficientBalance`
/// - inactive account → `InvalidState`
/// - untracked stock, or an amount kind that does not match the subject →
///   `InvalidArgument`
pub fn project(subject: &Subject, delta: &EntryAmount) -> EngineResult<SubjectValue> {
    match (&subject.value, delta) {
        (SubjectValue::Stock { tracked: false, .. }, _) => Err(EngineError::invalid_argument(
            format!("product {} does not track stock", subject.id),
        )),
        (SubjectValue::Stock { on_hand, tracked }, EntryAmount::Units(units)) => {
            let new_on_hand = on_hand + units;
            if new_on_hand < 0 {
                return Err(EngineError::InsufficientStock {
                    product: subject.id.to_string(),
                    available: *on_hand,
                    requested: -units,
                });
            }
            Ok(SubjectValue::Stock {
                on_hand: new_on_hand,
                tracked: *tracked,
            })
        }
        (
            SubjectValue::Account {
                balance,
                credit_limit,
                active,
            },
            EntryAmount::Money(amount),
        ) => {
            if !active {
                return Err(EngineError::invalid_state(format!(
                    "account {} is not active",
                    subject.id
                )));
            }
            let new_balance = *balance + *amount;
            if new_balance < -*credit_limit {
                return Err(EngineError::InsufficientBalance {
                    account: subject.id.to_string(),
                    available: (*balance + *credit_limit).to_string(),
                    requested: (-*amount).to_string(),
                });
            }
            Ok(SubjectValue::Account {
                balance: new_balance,
                credit_limit: *credit_limit,
                active: *active,
            })
        }
        _ => Err(EngineError::invalid_argument(
            "movement amount kind does not match subject",
        )),
    }
}

/// Result of comparing the projected value against the full ledger sum.
///
/// Intended for periodic background verification, not the request hot path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub subject_id: SubjectId,
    pub projected: EntryAmount,
    pub ledger_sum: EntryAmount,
    pub consistent: bool,
}

impl ReconcileReport {
    pub fn new(subject_id: SubjectId, projected: EntryAmount, ledger_sum: EntryAmount) -> Self {
        let consistent = projected == ledger_sum;
        Self {
            subject_id,
            projected,
            ledger_sum,
            consistent,
        }
    }
}
