//! Item and category catalog operations.
//!
//! Every write emits one feed event after it succeeds. Stock is never
//! touched here; only the movement applicator changes balances.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use stockflow_core::{Actor, CategoryId, DomainError, DomainResult, ItemId};
use stockflow_events::{FeedEvent, FeedKind, FeedReference, FeedSink};
use stockflow_inventory::{
    Category, CategoryPatch, CategorySelection, Item, ItemPatch, NewCategory, NewItem, Sku,
};

use super::{CategoryLinkReconciler, owned};
use crate::error::StoreError;
use crate::store::{CategoryStore, ItemStore};

/// An item together with its category links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    #[serde(flatten)]
    pub item: Item,
    pub category_ids: BTreeSet<CategoryId>,
}

fn sku_conflict(err: StoreError) -> DomainError {
    match err {
        StoreError::UniqueViolation(_) => DomainError::invalid("SKU already exists"),
        other => other.into(),
    }
}

pub struct ItemCatalog<S, F> {
    store: Arc<S>,
    links: CategoryLinkReconciler<S>,
    feed: F,
}

impl<S: ItemStore + CategoryStore, F: FeedSink> ItemCatalog<S, F> {
    pub fn new(store: Arc<S>, feed: F) -> Self {
        Self {
            links: CategoryLinkReconciler::new(store.clone()),
            store,
            feed,
        }
    }

    async fn view(&self, item: Item) -> DomainResult<ItemView> {
        let category_ids = self.store.links_for_item(item.id).await?;
        Ok(ItemView { item, category_ids })
    }

    async fn owned_item(&self, actor: &Actor, id: ItemId) -> DomainResult<Item> {
        owned(actor, self.store.find_item(id).await?, |i| i.account_id)
    }

    async fn ensure_sku_free(&self, actor: &Actor, sku: &Sku) -> DomainResult<()> {
        match self.store.find_item_by_sku(actor.account_id(), sku).await? {
            Some(_) => Err(DomainError::invalid("SKU already exists")),
            None => Ok(()),
        }
    }

    /// Create an item with zero stock.
    ///
    /// The SKU pre-check gives a clean error in the common case; the unique
    /// constraint still decides between concurrent creators. If the initial
    /// links cannot be written the new row is removed again, so a failed
    /// create leaves nothing behind.
    #[instrument(skip(self, actor, new), fields(account_id = %actor.account_id(), sku = %new.sku), err)]
    pub async fn create(&self, actor: &Actor, new: &NewItem) -> DomainResult<ItemView> {
        let draft = new.validate(actor)?;
        self.ensure_sku_free(actor, &draft.sku).await?;

        let item = self.store.insert_item(draft).await.map_err(sku_conflict)?;
        if let Err(err) = self.links.reconcile(&item, &new.categories()).await {
            if let Err(cleanup) = self.store.delete_item(item.id).await {
                error!(item_id = %item.id, error = %cleanup, "could not remove half-created item");
            }
            return Err(err);
        }

        info!(item_id = %item.id, "item created");
        self.feed.emit(
            FeedEvent::new(
                actor.account_id(),
                actor.creator_id(),
                FeedKind::Created,
                FeedReference::Item(item.id),
            )
            .with_snapshot(item.name.clone(), item.description.clone()),
        );
        self.view(item).await
    }

    #[instrument(skip(self, actor, patch), fields(account_id = %actor.account_id()), err)]
    pub async fn update(&self, actor: &Actor, id: ItemId, patch: &ItemPatch) -> DomainResult<ItemView> {
        let changes = patch.validate()?;
        let current = self.owned_item(actor, id).await?;

        if let Some(sku) = &changes.sku {
            if sku != &current.sku {
                self.ensure_sku_free(actor, sku).await?;
            }
        }

        let item = if changes.is_empty() {
            current
        } else {
            self.store
                .update_item(id, &changes)
                .await
                .map_err(sku_conflict)?
                .ok_or(DomainError::NotFound)?
        };
        let plan = self.links.reconcile(&item, &patch.categories()).await?;

        if !changes.is_empty() || !plan.is_noop() {
            self.feed.emit(
                FeedEvent::new(
                    actor.account_id(),
                    actor.creator_id(),
                    FeedKind::Updated,
                    FeedReference::Item(item.id),
                )
                .with_snapshot(item.name.clone(), item.description.clone()),
            );
        }
        self.view(item).await
    }

    /// Refused with `INVALID_DATA` once the item has ledger history.
    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn delete(&self, actor: &Actor, id: ItemId) -> DomainResult<Item> {
        self.owned_item(actor, id).await?;

        let removed = self
            .store
            .delete_item(id)
            .await
            .map_err(|err| match err {
                StoreError::Referenced(_) => {
                    DomainError::invalid("item has stock movements and cannot be deleted")
                }
                other => other.into(),
            })?
            .ok_or(DomainError::NotFound)?;

        info!(item_id = %removed.id, "item deleted");
        self.feed.emit(
            FeedEvent::new(
                actor.account_id(),
                actor.creator_id(),
                FeedKind::Deleted,
                FeedReference::None,
            )
            .with_snapshot(removed.name.clone(), removed.description.clone())
            .with_message(format!("item {} deleted", removed.sku)),
        );
        Ok(removed)
    }

    pub async fn get(&self, actor: &Actor, id: ItemId) -> DomainResult<ItemView> {
        let item = self.owned_item(actor, id).await?;
        self.view(item).await
    }

    pub async fn list(&self, actor: &Actor) -> DomainResult<Vec<ItemView>> {
        let items = self.store.list_items(actor.account_id()).await?;
        let mut views = Vec::with_capacity(items.len());
        for item in items {
            views.push(self.view(item).await?);
        }
        Ok(views)
    }

    pub async fn list_by_category(
        &self,
        actor: &Actor,
        category_id: CategoryId,
    ) -> DomainResult<Vec<ItemView>> {
        owned(
            actor,
            self.store.find_category(category_id).await?,
            |c| c.account_id,
        )?;

        let mut views = Vec::new();
        for item_id in self.store.item_ids_in_category(category_id).await? {
            if let Some(item) = self.store.find_item(item_id).await? {
                if item.is_owned_by(actor.account_id()) {
                    views.push(self.view(item).await?);
                }
            }
        }
        Ok(views)
    }

    pub async fn list_uncategorized(&self, actor: &Actor) -> DomainResult<Vec<ItemView>> {
        Ok(self
            .list(actor)
            .await?
            .into_iter()
            .filter(|v| v.category_ids.is_empty())
            .collect())
    }
}

pub struct CategoryCatalog<S, F> {
    store: Arc<S>,
    feed: F,
}

impl<S: CategoryStore, F: FeedSink> CategoryCatalog<S, F> {
    pub fn new(store: Arc<S>, feed: F) -> Self {
        Self { store, feed }
    }

    async fn owned_category(&self, actor: &Actor, id: CategoryId) -> DomainResult<Category> {
        owned(actor, self.store.find_category(id).await?, |c| c.account_id)
    }

    fn announce(&self, actor: &Actor, kind: FeedKind, reference: FeedReference, category: &Category) {
        self.feed.emit(
            FeedEvent::new(actor.account_id(), actor.creator_id(), kind, reference)
                .with_snapshot(category.name.clone(), category.description.clone()),
        );
    }

    #[instrument(skip(self, actor, new), fields(account_id = %actor.account_id()), err)]
    pub async fn create(&self, actor: &Actor, new: &NewCategory) -> DomainResult<Category> {
        let draft = new.validate(actor)?;
        let category = self.store.insert_category(draft).await?;
        self.announce(
            actor,
            FeedKind::Created,
            FeedReference::Category(category.id),
            &category,
        );
        Ok(category)
    }

    #[instrument(skip(self, actor, patch), fields(account_id = %actor.account_id()), err)]
    pub async fn update(
        &self,
        actor: &Actor,
        id: CategoryId,
        patch: &CategoryPatch,
    ) -> DomainResult<Category> {
        let changes = patch.validate()?;
        let current = self.owned_category(actor, id).await?;
        if changes.is_empty() {
            return Ok(current);
        }

        let category = self
            .store
            .update_category(id, &changes)
            .await?
            .ok_or(DomainError::NotFound)?;
        self.announce(
            actor,
            FeedKind::Updated,
            FeedReference::Category(category.id),
            &category,
        );
        Ok(category)
    }

    /// Removes the category and detaches it from every item.
    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn delete(&self, actor: &Actor, id: CategoryId) -> DomainResult<Category> {
        self.owned_category(actor, id).await?;
        let removed = self
            .store
            .delete_category(id)
            .await?
            .ok_or(DomainError::NotFound)?;
        self.announce(actor, FeedKind::Deleted, FeedReference::None, &removed);
        Ok(removed)
    }

    pub async fn get(&self, actor: &Actor, id: CategoryId) -> DomainResult<Category> {
        self.owned_category(actor, id).await
    }

    pub async fn list(&self, actor: &Actor) -> DomainResult<Vec<Category>> {
        Ok(self.store.list_categories(actor.account_id()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockflow_core::{AccountId, EmployeeId};
    use stockflow_events::RecordingFeedSink;
    use stockflow_inventory::{MovementBatch, MovementLine};

    use crate::services::MovementApplicator;
    use crate::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        feed: Arc<RecordingFeedSink>,
        items: ItemCatalog<InMemoryStore, Arc<RecordingFeedSink>>,
        categories: CategoryCatalog<InMemoryStore, Arc<RecordingFeedSink>>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::arc();
        let feed = Arc::new(RecordingFeedSink::new());
        Fixture {
            items: ItemCatalog::new(store.clone(), feed.clone()),
            categories: CategoryCatalog::new(store.clone(), feed.clone()),
            store,
            feed,
        }
    }

    fn owner() -> Actor {
        Actor::employee(AccountId::new(1), EmployeeId::new(7))
    }

    fn new_item(sku: &str, categories: Option<Vec<CategoryId>>) -> NewItem {
        NewItem {
            sku: sku.into(),
            name: format!("item {sku}"),
            description: None,
            category_ids: categories,
        }
    }

    async fn category(fx: &Fixture, name: &str) -> Category {
        fx.categories
            .create(
                &owner(),
                &NewCategory {
                    name: name.into(),
                    description: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_links_categories_and_emits_feed() {
        let fx = fixture();
        let tools = category(&fx, "Tools").await;

        let view = fx
            .items
            .create(&owner(), &new_item("HAMMER", Some(vec![tools.id, CategoryId::new(99)])))
            .await
            .unwrap();

        assert_eq!(view.item.stock, 0);
        assert_eq!(view.item.creator_id, Some(EmployeeId::new(7)));
        assert_eq!(view.category_ids, [tools.id].into_iter().collect());

        let events = fx.feed.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, FeedKind::Created);
        assert_eq!(events[1].reference, FeedReference::Item(view.item.id));
        assert_eq!(events[1].name.as_deref(), Some("item HAMMER"));
    }

    #[tokio::test]
    async fn duplicate_sku_is_invalid_data() {
        let fx = fixture();
        fx.items.create(&owner(), &new_item("A-1", None)).await.unwrap();

        let err = fx
            .items
            .create(&owner(), &new_item("  A-1 ", None))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::invalid("SKU already exists"));

        let other_account = Actor::account(AccountId::new(2));
        fx.items.create(&other_account, &new_item("A-1", None)).await.unwrap();
    }

    #[tokio::test]
    async fn failed_link_write_leaves_no_item_behind() {
        let fx = fixture();
        let tools = category(&fx, "Tools").await;
        let before = fx.feed.events().len();

        fx.store.fail_next_link_writes(1);
        let err = fx
            .items
            .create(&owner(), &new_item("DRILL", Some(vec![tools.id])))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");

        let sku = Sku::parse("DRILL").unwrap();
        assert!(fx.store.find_item_by_sku(AccountId::new(1), &sku).await.unwrap().is_none());
        assert_eq!(fx.feed.events().len(), before);

        let view = fx
            .items
            .create(&owner(), &new_item("DRILL", Some(vec![tools.id])))
            .await
            .unwrap();
        assert_eq!(view.category_ids, [tools.id].into_iter().collect());
    }

    #[tokio::test]
    async fn update_keeps_own_sku_and_rejects_taken_one() {
        let fx = fixture();
        let a = fx.items.create(&owner(), &new_item("A", None)).await.unwrap();
        fx.items.create(&owner(), &new_item("B", None)).await.unwrap();

        let same = ItemPatch {
            sku: Some("A".into()),
            name: Some("renamed".into()),
            ..ItemPatch::default()
        };
        let view = fx.items.update(&owner(), a.item.id, &same).await.unwrap();
        assert_eq!(view.item.name, "renamed");

        let taken = ItemPatch {
            sku: Some("B".into()),
            ..ItemPatch::default()
        };
        let err = fx.items.update(&owner(), a.item.id, &taken).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }

    #[tokio::test]
    async fn update_distinguishes_absent_and_empty_categories() {
        let fx = fixture();
        let tools = category(&fx, "Tools").await;
        let view = fx
            .items
            .create(&owner(), &new_item("SAW", Some(vec![tools.id])))
            .await
            .unwrap();

        let untouched = fx
            .items
            .update(&owner(), view.item.id, &ItemPatch::default())
            .await
            .unwrap();
        assert_eq!(untouched.category_ids.len(), 1);

        let detached = fx
            .items
            .update(
                &owner(),
                view.item.id,
                &ItemPatch {
                    category_ids: Some(vec![]),
                    ..ItemPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(detached.category_ids.is_empty());

        let uncategorized = fx.items.list_uncategorized(&owner()).await.unwrap();
        assert_eq!(uncategorized.len(), 1);
    }

    #[tokio::test]
    async fn noop_update_emits_nothing() {
        let fx = fixture();
        let view = fx.items.create(&owner(), &new_item("X", None)).await.unwrap();
        let before = fx.feed.len();

        fx.items
            .update(&owner(), view.item.id, &ItemPatch::default())
            .await
            .unwrap();
        assert_eq!(fx.feed.len(), before);
    }

    #[tokio::test]
    async fn foreign_item_is_unauthorized() {
        let fx = fixture();
        let view = fx.items.create(&owner(), &new_item("X", None)).await.unwrap();
        let stranger = Actor::account(AccountId::new(2));

        assert_eq!(
            fx.items.get(&stranger, view.item.id).await.unwrap_err(),
            DomainError::Unauthorized
        );
        assert_eq!(
            fx.items.delete(&stranger, view.item.id).await.unwrap_err(),
            DomainError::Unauthorized
        );
        assert_eq!(
            fx.items.get(&owner(), ItemId::new(404)).await.unwrap_err(),
            DomainError::NotFound
        );
    }

    #[tokio::test]
    async fn item_with_ledger_history_cannot_be_deleted() {
        let fx = fixture();
        let view = fx.items.create(&owner(), &new_item("X", None)).await.unwrap();
        let applicator = MovementApplicator::new(fx.store.clone(), fx.feed.clone());
        applicator
            .apply(
                &owner(),
                &MovementBatch::new(vec![MovementLine::incoming(
                    view.item.id,
                    1,
                    rust_decimal::Decimal::ONE,
                )])
                .unwrap(),
            )
            .await
            .unwrap();

        let err = fx.items.delete(&owner(), view.item.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
        assert!(fx.items.get(&owner(), view.item.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_without_history_emits_deleted_event() {
        let fx = fixture();
        let view = fx.items.create(&owner(), &new_item("GONE", None)).await.unwrap();

        fx.items.delete(&owner(), view.item.id).await.unwrap();

        let last = fx.feed.events().pop().unwrap();
        assert_eq!(last.kind, FeedKind::Deleted);
        assert_eq!(last.reference, FeedReference::None);
        assert_eq!(last.message.as_deref(), Some("item GONE deleted"));
        assert_eq!(
            fx.items.get(&owner(), view.item.id).await.unwrap_err(),
            DomainError::NotFound
        );
    }

    #[tokio::test]
    async fn list_by_category_and_category_delete() {
        let fx = fixture();
        let tools = category(&fx, "Tools").await;
        fx.items
            .create(&owner(), &new_item("SAW", Some(vec![tools.id])))
            .await
            .unwrap();
        fx.items.create(&owner(), &new_item("GLUE", None)).await.unwrap();

        let in_tools = fx.items.list_by_category(&owner(), tools.id).await.unwrap();
        assert_eq!(in_tools.len(), 1);
        assert_eq!(in_tools[0].item.sku.as_str(), "SAW");

        fx.categories.delete(&owner(), tools.id).await.unwrap();
        assert_eq!(fx.items.list_uncategorized(&owner()).await.unwrap().len(), 2);
        assert_eq!(
            fx.items.list_by_category(&owner(), tools.id).await.unwrap_err(),
            DomainError::NotFound
        );
    }

    #[tokio::test]
    async fn category_update_and_scoping() {
        let fx = fixture();
        let tools = category(&fx, "Tools").await;

        let renamed = fx
            .categories
            .update(
                &owner(),
                tools.id,
                &CategoryPatch {
                    name: Some("Hand tools".into()),
                    description: Some("manual".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Hand tools");
        assert_eq!(renamed.description.as_deref(), Some("manual"));

        let stranger = Actor::account(AccountId::new(2));
        assert_eq!(
            fx.categories.get(&stranger, tools.id).await.unwrap_err(),
            DomainError::Unauthorized
        );
        assert!(fx.categories.list(&stranger).await.unwrap().is_empty());
        assert_eq!(fx.categories.list(&owner()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_description_clears_and_absent_keeps() {
        let fx = fixture();
        let created = fx
            .items
            .create(
                &owner(),
                &NewItem {
                    description: Some("steel".into()),
                    ..new_item("NAIL", None)
                },
            )
            .await
            .unwrap();

        let renamed = ItemPatch {
            name: Some("nail".into()),
            ..ItemPatch::default()
        };
        let view = fx.items.update(&owner(), created.item.id, &renamed).await.unwrap();
        assert_eq!(view.item.description.as_deref(), Some("steel"));

        let clear = ItemPatch {
            description: Some(" ".into()),
            ..ItemPatch::default()
        };
        let view = fx.items.update(&owner(), created.item.id, &clear).await.unwrap();
        assert_eq!(view.item.description, None);

        let tools = fx
            .categories
            .create(
                &owner(),
                &NewCategory {
                    name: "Tools".into(),
                    description: Some("hand".into()),
                },
            )
            .await
            .unwrap();
        let cleared = fx
            .categories
            .update(
                &owner(),
                tools.id,
                &CategoryPatch {
                    name: None,
                    description: Some(String::new()),
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.name, "Tools");
    }
}
