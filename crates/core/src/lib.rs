//! `opsledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;

pub use error::{EngineError, EngineResult};
pub use id::{ActorId, DocumentId, EntryId, SubjectId, TenantId};
pub use money::{Money, Quantity};
