//! Storage boundary for items, categories, the movement ledger and the feed.
//!
//! Reads and single-row writes go through the per-concern traits. Anything
//! that must change the stock counter goes through a [`StockTransaction`], so
//! the balance update and its ledger row commit or roll back together.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;

use stockflow_core::{AccountId, CategoryId, EmployeeId, ItemId, MovementId};
use stockflow_events::{FeedEntry, FeedEvent, FeedReference};
use stockflow_inventory::{
    Category, CategoryChanges, CategoryDraft, Item, ItemChanges, ItemDraft, LinkPlan, Movement,
    NewMovement, Sku, StockRejection,
};

use crate::error::StoreError;

pub use in_memory::{InMemoryStockTx, InMemoryStore};
pub use postgres::{PgStockTx, PostgresStore};

/// Item rows. Stock is never written through this trait.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Used to enforce SKU uniqueness before insert/update.
    async fn find_item_by_sku(
        &self,
        account_id: AccountId,
        sku: &Sku,
    ) -> Result<Option<Item>, StoreError>;

    async fn list_items(&self, account_id: AccountId) -> Result<Vec<Item>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the SKU is taken.
    async fn insert_item(&self, draft: ItemDraft) -> Result<Item, StoreError>;

    async fn update_item(
        &self,
        id: ItemId,
        changes: &ItemChanges,
    ) -> Result<Option<Item>, StoreError>;

    /// Fails with [`StoreError::Referenced`] when the item has ledger rows.
    async fn delete_item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;
}

/// Category rows and item↔category links.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError>;

    async fn list_categories(&self, account_id: AccountId) -> Result<Vec<Category>, StoreError>;

    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category, StoreError>;

    async fn update_category(
        &self,
        id: CategoryId,
        changes: &CategoryChanges,
    ) -> Result<Option<Category>, StoreError>;

    /// Removes the category and every link pointing at it.
    async fn delete_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError>;

    /// Subset of `ids` that exist and belong to `account_id`.
    async fn owned_category_ids(
        &self,
        account_id: AccountId,
        ids: &BTreeSet<CategoryId>,
    ) -> Result<BTreeSet<CategoryId>, StoreError>;

    async fn links_for_item(&self, item_id: ItemId) -> Result<BTreeSet<CategoryId>, StoreError>;

    async fn item_ids_in_category(&self, category_id: CategoryId)
    -> Result<Vec<ItemId>, StoreError>;

    /// Apply deletions then insertions atomically. Inserting an existing link is a no-op.
    async fn apply_link_plan(&self, item_id: ItemId, plan: &LinkPlan) -> Result<(), StoreError>;
}

/// Read-only projections of the append-only ledger, newest first.
///
/// There is no update or delete operation; new rows only enter through
/// [`StockTransaction::append_movement`].
#[async_trait]
pub trait MovementLedger: Send + Sync {
    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>, StoreError>;

    async fn movements_for_item(&self, item_id: ItemId) -> Result<Vec<Movement>, StoreError>;

    async fn movements_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Movement>, StoreError>;
}

/// One atomic unit over the stock counter and the ledger.
///
/// Dropping a transaction without calling [`commit`](StockTransaction::commit)
/// rolls it back.
#[async_trait]
pub trait StockTransaction: Send {
    /// Read the item and hold it against concurrent adjustment until the
    /// transaction ends.
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Apply `delta` only if the resulting balance stays within `0..=i64::MAX`.
    ///
    /// The outer error is a storage fault; the inner one is a business
    /// refusal and leaves the balance untouched.
    async fn adjust_stock_if_sufficient(
        &mut self,
        id: ItemId,
        delta: i64,
    ) -> Result<Result<Item, StockRejection>, StoreError>;

    /// Pure ledger insert. Business validation is the caller's job.
    async fn append_movement(&mut self, movement: NewMovement) -> Result<Movement, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// A backend that can open stock transactions.
#[async_trait]
pub trait InventoryStore: ItemStore + MovementLedger {
    type Tx: StockTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Persistent audit feed. Every listing is newest first.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn append_feed(&self, event: FeedEvent) -> Result<FeedEntry, StoreError>;

    async fn feed_for_account(&self, account_id: AccountId) -> Result<Vec<FeedEntry>, StoreError>;

    async fn feed_for_reference(
        &self,
        reference: FeedReference,
    ) -> Result<Vec<FeedEntry>, StoreError>;

    async fn feed_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<FeedEntry>, StoreError>;
}
