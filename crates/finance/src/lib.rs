//! `opsledger-finance`: financial transaction and transfer documents.
//!
//! Pure business rules: payment settlement, account-to-account transfers and
//! compensating reversals, each expressed as a plan the engine persists
//! atomically.

pub mod transaction;
pub mod transfer;

pub use transaction::{
    FinancialTransaction, PaymentDetails, PaymentPlan, ReversalPlan, TransactionDirection,
    TransactionDraft, TransactionId, TransactionStatus, plan_payment, plan_reversal,
};
pub use transfer::{Transfer, TransferId, TransferPlan, plan_transfer};
