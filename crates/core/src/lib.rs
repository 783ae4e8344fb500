//! `stockflow-core`: foundation building blocks shared by every crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod actor;
pub mod error;
pub mod id;

pub use actor::Actor;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, CategoryId, EmployeeId, FeedEntryId, ItemId, MovementId};
