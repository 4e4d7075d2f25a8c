//! Financial transactions: pending income/expense documents, their payment
//! settlement and compensating reversal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use opsledger_core::{
    ActorId, DocumentId, EngineError, EngineResult, EntryId, Money, SubjectId, TenantId,
};
use opsledger_ledger::{EntryAmount, EntryKind, NewEntry, Subject, project};

/// Financial transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub DocumentId);

impl TransactionId {
    pub fn new(id: DocumentId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Whether settling the transaction credits or debits the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionDirection {
    Income,
    Expense,
}

/// Transaction settlement state: `Pending → Paid → Reversed`.
///
/// `Reversed` is terminal. A reversed transaction cannot be paid again (its
/// payment entry already exists in the append-only ledger); the caller
/// records a fresh transaction instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Reversed,
}

/// Caller's intent for a new pending transaction. Creating it has no ledger
/// effect; only payment moves money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub account_id: SubjectId,
    pub direction: TransactionDirection,
    pub amount: Money,
    pub description: String,
}

/// Financial transaction document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub account_id: SubjectId,
    pub direction: TransactionDirection,
    pub amount: Money,
    pub description: String,
    pub status: TransactionStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
}

impl FinancialTransaction {
    pub fn from_draft(
        tenant_id: TenantId,
        actor_id: ActorId,
        draft: &TransactionDraft,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        if !draft.amount.is_positive() {
            return Err(EngineError::invalid_argument(
                "transaction amount must be positive",
            ));
        }
        Ok(Self {
            id: TransactionId::new(DocumentId::new()),
            tenant_id,
            account_id: draft.account_id,
            direction: draft.direction,
            amount: draft.amount,
            description: draft.description.clone(),
            status: TransactionStatus::Pending,
            paid_at: None,
            created_at: now,
            created_by: actor_id,
        })
    }

    /// Signed ledger amount of settling this transaction.
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            TransactionDirection::Income => self.amount,
            TransactionDirection::Expense => -self.amount,
        }
    }

    fn entry_kind(&self) -> EntryKind {
        match self.direction {
            TransactionDirection::Income => EntryKind::In,
            TransactionDirection::Expense => EntryKind::Out,
        }
    }
}

/// Payment metadata supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    /// Settlement time; defaults to now.
    pub paid_at: Option<DateTime<Utc>>,
    /// Free-form payment reference (bank slip, gateway id).
    pub reference: Option<String>,
}

/// Everything `pay_transaction` must persist, atomically.
#[derive(Debug, Clone)]
pub struct PaymentPlan {
    pub transaction: FinancialTransaction,
    pub entry: NewEntry,
    pub account: Subject,
}

/// Settle a pending transaction against its account.
///
/// The credit-limit check applies here exactly as it does for transfers: an
/// expense that would push the account below `-credit_limit` fails
/// `InsufficientBalance`.
pub fn plan_payment(
    transaction: &FinancialTransaction,
    account: &Subject,
    actor_id: ActorId,
    details: &PaymentDetails,
    now: DateTime<Utc>,
) -> EngineResult<PaymentPlan> {
    if transaction.status != TransactionStatus::Pending {
        return Err(EngineError::invalid_state(format!(
            "transaction {} is not pending",
            transaction.id
        )));
    }
    if account.id != transaction.account_id {
        return Err(EngineError::invalid_argument(
            "account does not match transaction",
        ));
    }

    let delta = EntryAmount::Money(transaction.signed_amount());
    let previous_value = account.value.as_amount();
    let mut account = account.clone();
    account.value = project(&account, &delta)?;

    let reason = match &details.reference {
        Some(reference) => format!("payment ({reference}): {}", transaction.description),
        None => format!("payment: {}", transaction.description),
    };

    let entry = NewEntry {
        id: EntryId::new(),
        tenant_id: transaction.tenant_id,
        subject_id: account.id,
        kind: transaction.entry_kind(),
        amount: delta,
        unit_cost: None,
        reason,
        document_id: Some(transaction.id.0),
        actor_id,
        previous_value,
        new_value: account.value.as_amount(),
        recorded_at: now,
    };

    let mut transaction = transaction.clone();
    transaction.status = TransactionStatus::Paid;
    transaction.paid_at = Some(details.paid_at.unwrap_or(now));

    Ok(PaymentPlan {
        transaction,
        entry,
        account,
    })
}

/// Everything a reversal must persist, atomically.
#[derive(Debug, Clone)]
pub struct ReversalPlan {
    pub transaction: FinancialTransaction,
    pub entry: NewEntry,
    pub account: Subject,
}

/// Compensate a paid transaction before its deletion.
///
/// The ledger is strictly append-only: the original entry stays untouched and
/// a new entry of the opposite sign (and opposite kind) restores the balance.
/// The document moves to the terminal `Reversed` state.
pub fn plan_reversal(
    transaction: &FinancialTransaction,
    account: &Subject,
    actor_id: ActorId,
    now: DateTime<Utc>,
) -> EngineResult<ReversalPlan> {
    if transaction.status != TransactionStatus::Paid {
        return Err(EngineError::invalid_state(format!(
            "transaction {} is not paid",
            transaction.id
        )));
    }
    if account.id != transaction.account_id {
        return Err(EngineError::invalid_argument(
            "account does not match transaction",
        ));
    }

    let delta = EntryAmount::Money(-transaction.signed_amount());
    let kind = match transaction.direction {
        TransactionDirection::Income => EntryKind::Out,
        TransactionDirection::Expense => EntryKind::In,
    };

    let previous_value = account.value.as_amount();
    let mut account = account.clone();
    account.value = project(&account, &delta)?;

    let entry = NewEntry {
        id: EntryId::new(),
        tenant_id: transaction.tenant_id,
        subject_id: account.id,
        kind,
        amount: delta,
        unit_cost: None,
        reason: format!("reversal: {}", transaction.description),
        document_id: Some(transaction.id.0),
        actor_id,
        previous_value,
        new_value: account.value.as_amount(),
        recorded_at: now,
    };

    let mut transaction = transaction.clone();
    transaction.status = TransactionStatus::Reversed;
    transaction.paid_at = None;

    Ok(ReversalPlan {
        transaction,
        entry,
        account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsledger_ledger::SubjectValue;

    fn account(tenant_id: TenantId, balance: i64, credit_limit: i64) -> Subject {
        Subject::new(
            tenant_id,
            "checking",
            SubjectValue::account(Money::from_major(balance), Money::from_major(credit_limit)),
        )
    }

    fn pending(
        tenant_id: TenantId,
        account_id: SubjectId,
        direction: TransactionDirection,
        amount: i64,
    ) -> FinancialTransaction {
        FinancialTransaction::from_draft(
            tenant_id,
            ActorId::new(),
            &TransactionDraft {
                account_id,
                direction,
                amount: Money::from_major(amount),
                description: "office supplies".to_string(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn income_payment_credits_the_account() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Income, 40);

        let plan = plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
            .unwrap();

        assert_eq!(plan.transaction.status, TransactionStatus::Paid);
        assert!(plan.transaction.paid_at.is_some());
        assert_eq!(plan.entry.kind, EntryKind::In);
        assert_eq!(plan.entry.amount, EntryAmount::Money(Money::from_major(40)));
        assert_eq!(plan.account.balance(), Some(Money::from_major(140)));
    }

    #[test]
    fn expense_payment_debits_the_account() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Expense, 40);

        let plan = plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
            .unwrap();

        assert_eq!(plan.entry.kind, EntryKind::Out);
        assert_eq!(plan.entry.amount, EntryAmount::Money(Money::from_major(-40)));
        assert_eq!(plan.account.balance(), Some(Money::from_major(60)));
    }

    #[test]
    fn expense_beyond_credit_limit_is_rejected() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 10, 20);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Expense, 31);

        let err =
            plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
                .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    }

    #[test]
    fn paying_a_paid_transaction_is_invalid_state() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Income, 40);
        let plan = plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
            .unwrap();

        let err = plan_payment(
            &plan.transaction,
            &plan.account,
            ActorId::new(),
            &PaymentDetails::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn reversal_restores_the_balance_with_a_compensating_entry() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Expense, 30);
        let paid = plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
            .unwrap();
        assert_eq!(paid.account.balance(), Some(Money::from_major(70)));

        let reversal =
            plan_reversal(&paid.transaction, &paid.account, ActorId::new(), Utc::now()).unwrap();
        assert_eq!(reversal.entry.kind, EntryKind::In);
        assert_eq!(
            reversal.entry.amount,
            EntryAmount::Money(Money::from_major(30))
        );
        assert_eq!(reversal.account.balance(), Some(Money::from_major(100)));
        assert_eq!(reversal.transaction.status, TransactionStatus::Reversed);
        assert_eq!(reversal.transaction.paid_at, None);
    }

    #[test]
    fn reversed_transaction_cannot_be_paid_again() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Expense, 30);
        let paid = plan_payment(&txn, &acct, ActorId::new(), &PaymentDetails::default(), Utc::now())
            .unwrap();
        let reversal =
            plan_reversal(&paid.transaction, &paid.account, ActorId::new(), Utc::now()).unwrap();

        let err = plan_payment(
            &reversal.transaction,
            &reversal.account,
            ActorId::new(),
            &PaymentDetails::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // reversal is terminal in the other direction too
        let err =
            plan_reversal(&reversal.transaction, &reversal.account, ActorId::new(), Utc::now())
                .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn reversing_a_pending_transaction_is_invalid_state() {
        let tenant_id = TenantId::new();
        let acct = account(tenant_id, 100, 0);
        let txn = pending(tenant_id, acct.id, TransactionDirection::Income, 40);
        assert!(matches!(
            plan_reversal(&txn, &acct, ActorId::new(), Utc::now()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn non_positive_draft_amount_is_rejected() {
        let err = FinancialTransaction::from_draft(
            TenantId::new(),
            ActorId::new(),
            &TransactionDraft {
                account_id: SubjectId::new(),
                direction: TransactionDirection::Income,
                amount: Money::ZERO,
                description: "nothing".to_string(),
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
