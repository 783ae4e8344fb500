//! Inventory domain module.
//!
//! This crate contains the business rules for stock items, categories and the
//! movement ledger, implemented purely as deterministic domain logic (no IO,
//! no storage). Storage and orchestration live in `stockflow-infra`.

pub mod batch;
pub mod category;
pub mod costing;
pub mod item;
pub mod movement;

pub use batch::{BatchOutcome, BatchPolicy, LineOutcome, RejectReason};
pub use category::{
    Category, CategoryChanges, CategoryDraft, CategoryPatch, CategorySelection, LinkPlan,
    NewCategory,
};
pub use costing::WeightedAverage;
pub use item::{Item, ItemChanges, ItemDraft, ItemPatch, NewItem, Sku, StockRejection};
pub use movement::{Direction, Movement, MovementBatch, MovementLine, NewMovement};
