//! Category Link Reconciler.

use std::sync::Arc;

use tracing::{debug, instrument};

use stockflow_core::DomainResult;
use stockflow_inventory::{CategorySelection, Item, LinkPlan};

use crate::store::CategoryStore;

/// Converges an item's stored category links onto a desired set.
///
/// Desired ids that do not exist or belong to another account are dropped
/// silently before diffing. `CategorySelection::Unchanged` does no IO at all;
/// `Replace` with an empty set detaches the item from every category.
pub struct CategoryLinkReconciler<S> {
    store: Arc<S>,
}

impl<S> Clone for CategoryLinkReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: CategoryStore> CategoryLinkReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the writes that were applied (empty on a repeat call).
    #[instrument(skip(self, item, selection), fields(item_id = %item.id, account_id = %item.account_id), err)]
    pub async fn reconcile(
        &self,
        item: &Item,
        selection: &CategorySelection,
    ) -> DomainResult<LinkPlan> {
        let CategorySelection::Replace(requested) = selection else {
            return Ok(LinkPlan::default());
        };

        let desired = self
            .store
            .owned_category_ids(item.account_id, requested)
            .await?;
        if desired.len() < requested.len() {
            debug!(
                ignored = requested.len() - desired.len(),
                "ignoring unknown or foreign categories"
            );
        }

        let existing = self.store.links_for_item(item.id).await?;
        let plan = LinkPlan::diff(&existing, &desired);
        if plan.is_noop() {
            return Ok(plan);
        }

        self.store.apply_link_plan(item.id, &plan).await?;
        debug!(
            added = plan.to_add.len(),
            removed = plan.to_remove.len(),
            "category links reconciled"
        );
        Ok(plan)
    }
}
