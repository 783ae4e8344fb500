//! In-memory store for tests/dev.
//!
//! All tables live behind one async mutex. A [`InMemoryStockTx`] holds the
//! lock for its whole lifetime, which serializes stock transactions exactly
//! like a row lock would, and keeps an undo journal for rollback.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockflow_core::{AccountId, CategoryId, EmployeeId, FeedEntryId, ItemId, MovementId};
use stockflow_events::{FeedEntry, FeedEvent, FeedReference};
use stockflow_inventory::{
    Category, CategoryChanges, CategoryDraft, Item, ItemChanges, ItemDraft, LinkPlan, Movement,
    NewMovement, Sku, StockRejection,
};

use super::{
    CategoryStore, FeedStore, InventoryStore, ItemStore, MovementLedger, StockTransaction,
};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Sequences {
    item: i64,
    category: i64,
    movement: i64,
    feed: i64,
}

impl Sequences {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<ItemId, Item>,
    categories: BTreeMap<CategoryId, Category>,
    links: BTreeSet<(ItemId, CategoryId)>,
    /// Append order; never mutated in place.
    movements: Vec<Movement>,
    feed: Vec<FeedEntry>,
    seq: Sequences,
}

impl State {
    fn sku_taken(&self, account_id: AccountId, sku: &Sku, except: Option<ItemId>) -> bool {
        self.items
            .values()
            .any(|i| i.account_id == account_id && &i.sku == sku && Some(i.id) != except)
    }
}

/// In-memory implementation of every store trait.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

/// Injected store failures. Appends only run under the state lock, so the
/// two append counters are never raced.
#[derive(Debug, Default)]
struct Faults {
    pass: AtomicUsize,
    fail: AtomicUsize,
    link_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `count` ledger appends fail with a database fault.
    pub fn fail_next_appends(&self, count: usize) {
        self.fail_appends_after(0, count);
    }

    /// Let `successes` appends through, then fail the following `count`.
    pub fn fail_appends_after(&self, successes: usize, count: usize) {
        self.faults.pass.store(successes, Ordering::SeqCst);
        self.faults.fail.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` link-plan writes fail with a database fault.
    pub fn fail_next_link_writes(&self, count: usize) {
        self.faults.link_writes.store(count, Ordering::SeqCst);
    }

    fn take_append_failure(&self) -> bool {
        let decrement = |n: usize| n.checked_sub(1);
        if self.faults.fail.load(Ordering::SeqCst) == 0 {
            return false;
        }
        if self
            .faults
            .pass
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement)
            .is_ok()
        {
            return false;
        }
        self.faults
            .fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement)
            .is_ok()
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn find_item_by_sku(
        &self,
        account_id: AccountId,
        sku: &Sku,
    ) -> Result<Option<Item>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .find(|i| i.account_id == account_id && &i.sku == sku)
            .cloned())
    }

    async fn list_items(&self, account_id: AccountId) -> Result<Vec<Item>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| i.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn insert_item(&self, draft: ItemDraft) -> Result<Item, StoreError> {
        let mut state = self.state.lock().await;
        if state.sku_taken(draft.account_id, &draft.sku, None) {
            return Err(StoreError::UniqueViolation(format!(
                "sku {} already exists for account {}",
                draft.sku, draft.account_id
            )));
        }

        let now = Utc::now();
        let id = ItemId::new(Sequences::next(&mut state.seq.item));
        let item = Item {
            id,
            account_id: draft.account_id,
            creator_id: draft.creator_id,
            sku: draft.sku,
            name: draft.name,
            description: draft.description,
            stock: 0,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(id, item.clone());
        Ok(item)
    }

    async fn update_item(
        &self,
        id: ItemId,
        changes: &ItemChanges,
    ) -> Result<Option<Item>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(account_id) = state.items.get(&id).map(|i| i.account_id) else {
            return Ok(None);
        };
        if let Some(sku) = &changes.sku {
            if state.sku_taken(account_id, sku, Some(id)) {
                return Err(StoreError::UniqueViolation(format!(
                    "sku {sku} already exists for account {account_id}"
                )));
            }
        }

        let Some(item) = state.items.get_mut(&id) else {
            return Ok(None);
        };
        changes.apply_to(item, Utc::now());
        Ok(Some(item.clone()))
    }

    async fn delete_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let mut state = self.state.lock().await;
        if state.movements.iter().any(|m| m.item_id() == id) {
            return Err(StoreError::Referenced(format!(
                "item {id} has ledger movements"
            )));
        }
        let removed = state.items.remove(&id);
        if removed.is_some() {
            state.links.retain(|(item_id, _)| *item_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl CategoryStore for InMemoryStore {
    async fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        Ok(self.state.lock().await.categories.get(&id).cloned())
    }

    async fn list_categories(&self, account_id: AccountId) -> Result<Vec<Category>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .categories
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let id = CategoryId::new(Sequences::next(&mut state.seq.category));
        let category = Category {
            id,
            account_id: draft.account_id,
            creator_id: draft.creator_id,
            name: draft.name,
            description: draft.description,
            created_at: now,
            updated_at: now,
        };
        state.categories.insert(id, category.clone());
        Ok(category)
    }

    async fn update_category(
        &self,
        id: CategoryId,
        changes: &CategoryChanges,
    ) -> Result<Option<Category>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.categories.get_mut(&id).map(|c| {
            changes.apply_to(c, Utc::now());
            c.clone()
        }))
    }

    async fn delete_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.categories.remove(&id);
        if removed.is_some() {
            state.links.retain(|(_, category_id)| *category_id != id);
        }
        Ok(removed)
    }

    async fn owned_category_ids(
        &self,
        account_id: AccountId,
        ids: &BTreeSet<CategoryId>,
    ) -> Result<BTreeSet<CategoryId>, StoreError> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter(|id| {
                state
                    .categories
                    .get(id)
                    .is_some_and(|c| c.account_id == account_id)
            })
            .copied()
            .collect())
    }

    async fn links_for_item(&self, item_id: ItemId) -> Result<BTreeSet<CategoryId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .range((item_id, CategoryId::new(i64::MIN))..=(item_id, CategoryId::new(i64::MAX)))
            .map(|(_, category_id)| *category_id)
            .collect())
    }

    async fn item_ids_in_category(
        &self,
        category_id: CategoryId,
    ) -> Result<Vec<ItemId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .iter()
            .filter(|(_, c)| *c == category_id)
            .map(|(item_id, _)| *item_id)
            .collect())
    }

    async fn apply_link_plan(&self, item_id: ItemId, plan: &LinkPlan) -> Result<(), StoreError> {
        if self
            .faults
            .link_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::database("apply_link_plan", "injected failure"));
        }
        let mut state = self.state.lock().await;
        for category_id in &plan.to_remove {
            state.links.remove(&(item_id, *category_id));
        }
        for category_id in &plan.to_add {
            state.links.insert((item_id, *category_id));
        }
        Ok(())
    }
}

#[async_trait]
impl MovementLedger for InMemoryStore {
    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.movements.iter().find(|m| m.id() == id).cloned())
    }

    async fn movements_for_item(&self, item_id: ItemId) -> Result<Vec<Movement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| m.item_id() == item_id)
            .cloned()
            .collect())
    }

    async fn movements_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Movement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| m.account_id() == account_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
enum Undo {
    Stock {
        id: ItemId,
        stock: i64,
        updated_at: DateTime<Utc>,
    },
    Movement,
}

/// Stock transaction over [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryStockTx {
    guard: Option<OwnedMutexGuard<State>>,
    undo: Vec<Undo>,
    store: InMemoryStore,
}

impl InMemoryStockTx {
    fn state(&mut self) -> Result<&mut State, StoreError> {
        self.guard
            .as_deref_mut()
            .ok_or_else(|| StoreError::database("transaction", "transaction already finished"))
    }

    fn undo_all(&mut self) {
        let Some(state) = self.guard.as_deref_mut() else {
            return;
        };
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Stock {
                    id,
                    stock,
                    updated_at,
                } => {
                    if let Some(item) = state.items.get_mut(&id) {
                        item.stock = stock;
                        item.updated_at = updated_at;
                    }
                }
                Undo::Movement => {
                    state.movements.pop();
                }
            }
        }
    }
}

impl Drop for InMemoryStockTx {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[async_trait]
impl StockTransaction for InMemoryStockTx {
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.state()?.items.get(&id).cloned())
    }

    async fn adjust_stock_if_sufficient(
        &mut self,
        id: ItemId,
        delta: i64,
    ) -> Result<Result<Item, StockRejection>, StoreError> {
        let state = self.state()?;
        let Some(item) = state.items.get_mut(&id) else {
            return Err(StoreError::database(
                "adjust_stock",
                format!("item {id} vanished during transaction"),
            ));
        };

        let previous = Undo::Stock {
            id,
            stock: item.stock,
            updated_at: item.updated_at,
        };
        if let Err(rejection) = item.adjust_stock(delta, Utc::now()) {
            return Ok(Err(rejection));
        }
        let updated = item.clone();
        self.undo.push(previous);
        Ok(Ok(updated))
    }

    async fn append_movement(&mut self, movement: NewMovement) -> Result<Movement, StoreError> {
        if self.store.take_append_failure() {
            return Err(StoreError::database("append_movement", "injected failure"));
        }
        let state = self.state()?;
        let id = MovementId::new(Sequences::next(&mut state.seq.movement));
        let row = Movement::record(id, movement, Utc::now());
        state.movements.push(row.clone());
        self.undo.push(Undo::Movement);
        Ok(row)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.undo.clear();
        self.guard = None;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.undo_all();
        self.guard = None;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    type Tx = InMemoryStockTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(InMemoryStockTx {
            guard: Some(guard),
            undo: Vec::new(),
            store: self.clone(),
        })
    }
}

#[async_trait]
impl FeedStore for InMemoryStore {
    async fn append_feed(&self, event: FeedEvent) -> Result<FeedEntry, StoreError> {
        let mut state = self.state.lock().await;
        let id = FeedEntryId::new(Sequences::next(&mut state.seq.feed));
        let entry = FeedEntry {
            id,
            event,
            created_at: Utc::now(),
        };
        state.feed.push(entry.clone());
        Ok(entry)
    }

    async fn feed_for_account(&self, account_id: AccountId) -> Result<Vec<FeedEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .feed
            .iter()
            .rev()
            .filter(|e| e.event.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn feed_for_reference(
        &self,
        reference: FeedReference,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .feed
            .iter()
            .rev()
            .filter(|e| e.event.reference == reference)
            .cloned()
            .collect())
    }

    async fn feed_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .feed
            .iter()
            .rev()
            .filter(|e| e.event.creator_id == Some(employee_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_inventory::Direction;

    fn draft(account: i64, sku: &str) -> ItemDraft {
        ItemDraft {
            account_id: AccountId::new(account),
            creator_id: None,
            sku: Sku::parse(sku).unwrap(),
            name: format!("item {sku}"),
            description: None,
        }
    }

    fn incoming(item: &Item, qty: i64) -> NewMovement {
        NewMovement {
            account_id: item.account_id,
            item_id: item.id,
            creator_id: None,
            direction: Direction::In,
            quantity: qty,
            price: None,
        }
    }

    #[tokio::test]
    async fn sku_is_unique_per_account_only() {
        let store = InMemoryStore::new();
        store.insert_item(draft(1, "A")).await.unwrap();
        store.insert_item(draft(2, "A")).await.unwrap();

        let err = store.insert_item(draft(1, "A")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back_balance_and_ledger() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.adjust_stock_if_sufficient(item.id, 5).await.unwrap().unwrap();
            tx.append_movement(incoming(&item, 5)).await.unwrap();
        }

        assert_eq!(store.find_item(item.id).await.unwrap().unwrap().stock, 0);
        assert!(store.movements_for_item(item.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_transaction_persists() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.adjust_stock_if_sufficient(item.id, 5).await.unwrap().unwrap();
        tx.append_movement(incoming(&item, 5)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.find_item(item.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(store.movements_for_item(item.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insufficient_adjustment_leaves_balance() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let refused = tx.adjust_stock_if_sufficient(item.id, -1).await.unwrap();
        assert_eq!(
            refused.unwrap_err(),
            StockRejection::Insufficient {
                available: 0,
                requested: 1
            }
        );
        tx.commit().await.unwrap();
        assert_eq!(store.find_item(item.id).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn adjustment_past_i64_max_is_refused() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();
        store
            .state
            .lock()
            .await
            .items
            .get_mut(&item.id)
            .unwrap()
            .stock = i64::MAX - 2;

        let mut tx = store.begin().await.unwrap();
        let refused = tx.adjust_stock_if_sufficient(item.id, 3).await.unwrap();
        assert_eq!(
            refused.unwrap_err(),
            StockRejection::Overflow {
                available: i64::MAX - 2,
                incoming: 3
            }
        );
        let filled = tx.adjust_stock_if_sufficient(item.id, 2).await.unwrap().unwrap();
        assert_eq!(filled.stock, i64::MAX);
        tx.rollback().await.unwrap();

        assert_eq!(
            store.find_item(item.id).await.unwrap().unwrap().stock,
            i64::MAX - 2
        );
    }

    #[tokio::test]
    async fn item_with_history_cannot_be_deleted() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.adjust_stock_if_sufficient(item.id, 1).await.unwrap().unwrap();
        tx.append_movement(incoming(&item, 1)).await.unwrap();
        tx.commit().await.unwrap();

        let err = store.delete_item(item.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Referenced(_)));
    }

    #[tokio::test]
    async fn deleting_category_drops_links() {
        let store = InMemoryStore::new();
        let item = store.insert_item(draft(1, "A")).await.unwrap();
        let category = store
            .insert_category(CategoryDraft {
                account_id: AccountId::new(1),
                creator_id: None,
                name: "Hardware".into(),
                description: None,
            })
            .await
            .unwrap();
        let plan = LinkPlan {
            to_add: [category.id].into_iter().collect(),
            to_remove: BTreeSet::new(),
        };
        store.apply_link_plan(item.id, &plan).await.unwrap();
        assert_eq!(store.links_for_item(item.id).await.unwrap().len(), 1);

        store.delete_category(category.id).await.unwrap();
        assert!(store.links_for_item(item.id).await.unwrap().is_empty());
    }
}
