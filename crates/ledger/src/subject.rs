//! Ledger subjects: the entities whose denormalized current value is kept in
//! sync with the entry log.

use serde::{Deserialize, Serialize};

use opsledger_core::{Money, Quantity, SubjectId, TenantId};

use crate::entry::EntryAmount;

/// The denormalized current value of a subject, plus the policy knobs that
/// govern how far it may move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectValue {
    /// Stock-tracked product. `tracked == false` opts the product out of
    /// ledger accounting entirely; its `on_hand` is never touched.
    Stock { on_hand: Quantity, tracked: bool },
    /// Financial account. May go negative down to `-credit_limit`.
    Account {
        balance: Money,
        credit_limit: Money,
        active: bool,
    },
}

impl SubjectValue {
    pub fn stock(on_hand: Quantity) -> Self {
        SubjectValue::Stock {
            on_hand,
            tracked: true,
        }
    }

    pub fn untracked_stock() -> Self {
        SubjectValue::Stock {
            on_hand: 0,
            tracked: false,
        }
    }

    pub fn account(balance: Money, credit_limit: Money) -> Self {
        SubjectValue::Account {
            balance,
            credit_limit,
            active: true,
        }
    }

    /// Current value expressed as a ledger amount (for snapshots and
    /// reconciliation against the entry sum).
    pub fn as_amount(&self) -> EntryAmount {
        match self {
            SubjectValue::Stock { on_hand, .. } => EntryAmount::Units(*on_hand),
            SubjectValue::Account { balance, .. } => EntryAmount::Money(*balance),
        }
    }
}

/// A stock-tracked product or financial account, scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub tenant_id: TenantId,
    pub name: String,
    pub value: SubjectValue,
}

impl Subject {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, value: SubjectValue) -> Self {
        Self {
            id: SubjectId::new(),
            tenant_id,
            name: name.into(),
            value,
        }
    }

    pub fn is_stock(&self) -> bool {
        matches!(self.value, SubjectValue::Stock { .. })
    }

    pub fn is_account(&self) -> bool {
        matches!(self.value, SubjectValue::Account { .. })
    }

    /// Whether movements against this subject produce ledger entries.
    pub fn tracks_ledger(&self) -> bool {
        match self.value {
            SubjectValue::Stock { tracked, .. } => tracked,
            SubjectValue::Account { .. } => true,
        }
    }

    pub fn on_hand(&self) -> Option<Quantity> {
        match self.value {
            SubjectValue::Stock { on_hand, .. } => Some(on_hand),
            SubjectValue::Account { .. } => None,
        }
    }

    pub fn balance(&self) -> Option<Money> {
        match self.value {
            SubjectValue::Account { balance, .. } => Some(balance),
            SubjectValue::Stock { .. } => None,
        }
    }
}
