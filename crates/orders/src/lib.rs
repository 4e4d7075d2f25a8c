//! `opsledger-orders`: order documents and the fulfillment planner.
//!
//! Business rules only: deciding what an order looks like and which stock
//! movements it causes. Persistence and atomicity live in the engine crate.

pub mod fulfillment;
pub mod order;

pub use fulfillment::{FulfillmentPlan, plan_fulfillment};
pub use order::{
    Discount, LineDraft, Order, OrderDraft, OrderId, OrderLine, OrderNumber, OrderStatus,
};
