//! Services orchestrating the inventory core over the storage traits.
//!
//! Each service owns an `Arc` of its backend and is cheap to clone. Storage
//! faults are converted to [`stockflow_core::DomainError`] at this boundary.

pub mod catalog;
pub mod costing;
pub mod links;
pub mod movements;

pub use catalog::{CategoryCatalog, ItemCatalog, ItemView};
pub use costing::{CostAggregator, ItemValuation};
pub use links::CategoryLinkReconciler;
pub use movements::MovementApplicator;

use stockflow_core::{AccountId, Actor, DomainError, DomainResult};

/// Ownership gate shared by the services: absent is `NOT_FOUND`, another
/// account's row is `UNAUTHORIZED`.
pub(crate) fn owned<T>(
    actor: &Actor,
    row: Option<T>,
    account_of: impl FnOnce(&T) -> AccountId,
) -> DomainResult<T> {
    let row = row.ok_or(DomainError::NotFound)?;
    if !actor.owns(account_of(&row)) {
        return Err(DomainError::Unauthorized);
    }
    Ok(row)
}
