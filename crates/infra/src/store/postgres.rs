//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `23505` | `UniqueViolation` | Duplicate SKU within an account |
//! | `23503` | `Referenced` | Deleting an item that still has ledger rows |
//! | Any other | `Database` | Connectivity, constraint or decode failures |
//!
//! ## Stock transactions
//!
//! [`PgStockTx`] wraps a `Transaction<'static, Postgres>`. `lock_item` takes a
//! row lock (`SELECT ... FOR UPDATE`). `adjust_stock_if_sufficient` re-reads
//! the locked row, computes the new balance with checked arithmetic
//! ([`Item::balance_after`]) and writes it back, so two concurrent withdrawals
//! can never both observe the same balance and an oversized receipt is refused
//! instead of tripping a `bigint` range error. `CHECK (stock >= 0)` stays as a
//! backstop. Dropping the transaction without committing rolls it back.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, field, instrument};

use stockflow_core::{AccountId, CategoryId, EmployeeId, FeedEntryId, ItemId, MovementId};
use stockflow_events::{FeedEntry, FeedEvent, FeedKind, FeedReference};
use stockflow_inventory::{
    Category, CategoryChanges, CategoryDraft, Direction, Item, ItemChanges, ItemDraft, LinkPlan,
    Movement, NewMovement, Sku, StockRejection,
};

use super::{
    CategoryStore, FeedStore, InventoryStore, ItemStore, MovementLedger, StockTransaction,
};
use crate::error::{StoreError, map_sqlx_error};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Postgres implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn ids<T: Copy + Into<i64>>(set: &BTreeSet<T>) -> Vec<i64> {
    set.iter().map(|id| (*id).into()).collect()
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    let sku: String = row.try_get("sku")?;
    Ok(Item {
        id: ItemId::new(row.try_get("id")?),
        account_id: AccountId::new(row.try_get("account_id")?),
        creator_id: row
            .try_get::<Option<i64>, _>("employee_id")?
            .map(EmployeeId::new),
        sku: Sku::parse(&sku).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        stock: row.try_get("stock")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn category_from_row(row: &PgRow) -> Result<Category, sqlx::Error> {
    Ok(Category {
        id: CategoryId::new(row.try_get("id")?),
        account_id: AccountId::new(row.try_get("account_id")?),
        creator_id: row
            .try_get::<Option<i64>, _>("employee_id")?
            .map(EmployeeId::new),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<Movement, sqlx::Error> {
    let movement_type: String = row.try_get("movement_type")?;
    let direction = Direction::parse(&movement_type).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown movement_type {movement_type:?}").into())
    })?;
    let new = NewMovement {
        account_id: AccountId::new(row.try_get("account_id")?),
        item_id: ItemId::new(row.try_get("item_id")?),
        creator_id: row
            .try_get::<Option<i64>, _>("employee_id")?
            .map(EmployeeId::new),
        direction,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
    };
    Ok(Movement::record(
        MovementId::new(row.try_get("id")?),
        new,
        row.try_get("created_at")?,
    ))
}

fn feed_from_row(row: &PgRow) -> Result<FeedEntry, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    let kind = FeedKind::parse(&kind)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown feed kind {kind:?}").into()))?;
    let reference_type: String = row.try_get("reference_type")?;
    let reference_id: Option<i64> = row.try_get("reference_id")?;
    let reference = FeedReference::from_parts(&reference_type, reference_id).ok_or_else(|| {
        sqlx::Error::Decode(format!("bad feed reference {reference_type:?}").into())
    })?;

    Ok(FeedEntry {
        id: FeedEntryId::new(row.try_get("id")?),
        event: FeedEvent {
            account_id: AccountId::new(row.try_get("account_id")?),
            creator_id: row
                .try_get::<Option<i64>, _>("employee_id")?
                .map(EmployeeId::new),
            kind,
            reference,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            message: row.try_get("message")?,
            occurred_at: row.try_get("occurred_at")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn decode_all<T>(
    operation: &str,
    rows: Vec<PgRow>,
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| decode(row).map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

#[async_trait]
impl ItemStore for PostgresStore {
    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn find_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            FROM items
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_item", e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_item", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id, sku = %sku), err)]
    async fn find_item_by_sku(
        &self,
        account_id: AccountId,
        sku: &Sku,
    ) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            FROM items
            WHERE account_id = $1 AND sku = $2
            "#,
        )
        .bind(account_id.get())
        .bind(sku.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_item_by_sku", e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_item_by_sku", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id, item_count = field::Empty), err)]
    async fn list_items(&self, account_id: AccountId) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            FROM items
            WHERE account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_items", e))?;

        Span::current().record("item_count", rows.len());
        decode_all("list_items", rows, item_from_row)
    }

    #[instrument(skip(self, draft), fields(account_id = %draft.account_id, sku = %draft.sku), err)]
    async fn insert_item(&self, draft: ItemDraft) -> Result<Item, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO items (account_id, employee_id, sku, name, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            "#,
        )
        .bind(draft.account_id.get())
        .bind(draft.creator_id.map(i64::from))
        .bind(draft.sku.as_str())
        .bind(&draft.name)
        .bind(&draft.description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;

        item_from_row(&row).map_err(|e| map_sqlx_error("insert_item", e))
    }

    #[instrument(skip(self, changes), fields(item_id = %id), err)]
    async fn update_item(
        &self,
        id: ItemId,
        changes: &ItemChanges,
    ) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE items
            SET sku = COALESCE($2, sku),
                name = COALESCE($3, name),
                description = CASE WHEN $5 THEN $4 ELSE description END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(changes.sku.as_ref().map(Sku::as_str))
        .bind(&changes.name)
        .bind(changes.description.clone().flatten())
        .bind(changes.description.is_some())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("update_item", e))
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn delete_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        // stock_movements.item_id is ON DELETE RESTRICT, so history surfaces as 23503.
        let row = sqlx::query(
            r#"
            DELETE FROM items
            WHERE id = $1
            RETURNING id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_item", e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("delete_item", e))
    }
}

#[async_trait]
impl CategoryStore for PostgresStore {
    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn find_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, name, description, created_at, updated_at
            FROM categories
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_category", e))?;

        row.as_ref()
            .map(category_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_category", e))
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn list_categories(&self, account_id: AccountId) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, name, description, created_at, updated_at
            FROM categories
            WHERE account_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_categories", e))?;

        decode_all("list_categories", rows, category_from_row)
    }

    #[instrument(skip(self, draft), fields(account_id = %draft.account_id), err)]
    async fn insert_category(&self, draft: CategoryDraft) -> Result<Category, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO categories (account_id, employee_id, name, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, account_id, employee_id, name, description, created_at, updated_at
            "#,
        )
        .bind(draft.account_id.get())
        .bind(draft.creator_id.map(i64::from))
        .bind(&draft.name)
        .bind(&draft.description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_category", e))?;

        category_from_row(&row).map_err(|e| map_sqlx_error("insert_category", e))
    }

    #[instrument(skip(self, changes), fields(category_id = %id), err)]
    async fn update_category(
        &self,
        id: CategoryId,
        changes: &CategoryChanges,
    ) -> Result<Option<Category>, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE categories
            SET name = COALESCE($2, name),
                description = CASE WHEN $4 THEN $3 ELSE description END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, account_id, employee_id, name, description, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(&changes.name)
        .bind(changes.description.clone().flatten())
        .bind(changes.description.is_some())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_category", e))?;

        row.as_ref()
            .map(category_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("update_category", e))
    }

    #[instrument(skip(self), fields(category_id = %id), err)]
    async fn delete_category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        // item_categories cascades.
        let row = sqlx::query(
            r#"
            DELETE FROM categories
            WHERE id = $1
            RETURNING id, account_id, employee_id, name, description, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_category", e))?;

        row.as_ref()
            .map(category_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("delete_category", e))
    }

    #[instrument(skip(self, ids), fields(account_id = %account_id, requested = ids.len()), err)]
    async fn owned_category_ids(
        &self,
        account_id: AccountId,
        ids: &BTreeSet<CategoryId>,
    ) -> Result<BTreeSet<CategoryId>, StoreError> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let owned: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM categories
            WHERE account_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(account_id.get())
        .bind(self::ids(ids))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("owned_category_ids", e))?;

        Ok(owned.into_iter().map(CategoryId::new).collect())
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn links_for_item(&self, item_id: ItemId) -> Result<BTreeSet<CategoryId>, StoreError> {
        let linked: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT category_id FROM item_categories
            WHERE item_id = $1
            "#,
        )
        .bind(item_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("links_for_item", e))?;

        Ok(linked.into_iter().map(CategoryId::new).collect())
    }

    #[instrument(skip(self), fields(category_id = %category_id), err)]
    async fn item_ids_in_category(
        &self,
        category_id: CategoryId,
    ) -> Result<Vec<ItemId>, StoreError> {
        let linked: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT item_id FROM item_categories
            WHERE category_id = $1
            ORDER BY item_id ASC
            "#,
        )
        .bind(category_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("item_ids_in_category", e))?;

        Ok(linked.into_iter().map(ItemId::new).collect())
    }

    #[instrument(
        skip(self, plan),
        fields(item_id = %item_id, added = plan.to_add.len(), removed = plan.to_remove.len()),
        err
    )]
    async fn apply_link_plan(&self, item_id: ItemId, plan: &LinkPlan) -> Result<(), StoreError> {
        if plan.is_noop() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if !plan.to_remove.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM item_categories
                WHERE item_id = $1 AND category_id = ANY($2)
                "#,
            )
            .bind(item_id.get())
            .bind(ids(&plan.to_remove))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("unlink_categories", e))?;
        }

        if !plan.to_add.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO item_categories (item_id, category_id)
                SELECT $1, UNNEST($2::BIGINT[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(item_id.get())
            .bind(ids(&plan.to_add))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("link_categories", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl MovementLedger for PostgresStore {
    #[instrument(skip(self), fields(movement_id = %id), err)]
    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, item_id, employee_id, movement_type, quantity, price, created_at
            FROM stock_movements
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_movement", e))?;

        row.as_ref()
            .map(movement_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("get_movement", e))
    }

    #[instrument(skip(self), fields(item_id = %item_id, movement_count = field::Empty), err)]
    async fn movements_for_item(&self, item_id: ItemId) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, item_id, employee_id, movement_type, quantity, price, created_at
            FROM stock_movements
            WHERE item_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(item_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_for_item", e))?;

        Span::current().record("movement_count", rows.len());
        decode_all("movements_for_item", rows, movement_from_row)
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn movements_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, item_id, employee_id, movement_type, quantity, price, created_at
            FROM stock_movements
            WHERE account_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_for_account", e))?;

        decode_all("movements_for_account", rows, movement_from_row)
    }
}

/// Stock transaction over a pooled Postgres connection.
pub struct PgStockTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PgStockTx {
    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            FROM items
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_item", e))?;

        row.as_ref()
            .map(item_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("lock_item", e))
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn adjust_stock_if_sufficient(
        &mut self,
        id: ItemId,
        delta: i64,
    ) -> Result<Result<Item, StockRejection>, StoreError> {
        let Some(current) = self.lock_item(id).await? else {
            return Err(StoreError::database(
                "adjust_stock",
                format!("item {id} vanished during transaction"),
            ));
        };

        // Row is locked for the rest of the transaction, so the check holds.
        let next = match current.balance_after(delta) {
            Ok(next) => next,
            Err(rejection) => return Ok(Err(rejection)),
        };

        let row = sqlx::query(
            r#"
            UPDATE items
            SET stock = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, account_id, employee_id, sku, name, description, stock, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(next)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;

        let item = item_from_row(&row).map_err(|e| map_sqlx_error("adjust_stock", e))?;
        Ok(Ok(item))
    }

    #[instrument(
        skip(self, movement),
        fields(item_id = %movement.item_id, movement_type = movement.direction.as_str(), quantity = movement.quantity),
        err
    )]
    async fn append_movement(&mut self, movement: NewMovement) -> Result<Movement, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (account_id, item_id, employee_id, movement_type, quantity, price)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, created_at
            "#,
        )
        .bind(movement.account_id.get())
        .bind(movement.item_id.get())
        .bind(movement.creator_id.map(i64::from))
        .bind(movement.direction.as_str())
        .bind(movement.quantity)
        .bind(movement.price)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("append_movement", e))?;
        let created_at = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("append_movement", e))?;
        Ok(Movement::record(MovementId::new(id), movement, created_at))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    type Tx = PgStockTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgStockTx { tx })
    }
}

#[async_trait]
impl FeedStore for PostgresStore {
    #[instrument(
        skip(self, event),
        fields(account_id = %event.account_id, event_type = %event.event_type()),
        err
    )]
    async fn append_feed(&self, event: FeedEvent) -> Result<FeedEntry, StoreError> {
        let (reference_type, reference_id) = event.reference.to_parts();
        let row = sqlx::query(
            r#"
            INSERT INTO feed (
                account_id,
                employee_id,
                kind,
                reference_type,
                reference_id,
                name,
                description,
                message,
                occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, created_at
            "#,
        )
        .bind(event.account_id.get())
        .bind(event.creator_id.map(i64::from))
        .bind(event.kind.as_str())
        .bind(reference_type)
        .bind(reference_id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.message)
        .bind(event.occurred_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_feed", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("append_feed", e))?;
        let created_at = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("append_feed", e))?;
        Ok(FeedEntry {
            id: FeedEntryId::new(id),
            event,
            created_at,
        })
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn feed_for_account(&self, account_id: AccountId) -> Result<Vec<FeedEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, kind, reference_type, reference_id,
                   name, description, message, occurred_at, created_at
            FROM feed
            WHERE account_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(account_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("feed_for_account", e))?;

        decode_all("feed_for_account", rows, feed_from_row)
    }

    #[instrument(skip(self), err)]
    async fn feed_for_reference(
        &self,
        reference: FeedReference,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let (reference_type, reference_id) = reference.to_parts();
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, kind, reference_type, reference_id,
                   name, description, message, occurred_at, created_at
            FROM feed
            WHERE reference_type = $1 AND reference_id IS NOT DISTINCT FROM $2
            ORDER BY id DESC
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("feed_for_reference", e))?;

        decode_all("feed_for_reference", rows, feed_from_row)
    }

    #[instrument(skip(self), fields(employee_id = %employee_id), err)]
    async fn feed_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, employee_id, kind, reference_type, reference_id,
                   name, description, message, occurred_at, created_at
            FROM feed
            WHERE employee_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(employee_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("feed_for_employee", e))?;

        decode_all("feed_for_employee", rows, feed_from_row)
    }
}
