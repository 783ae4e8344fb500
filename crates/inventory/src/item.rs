use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AccountId, Actor, CategoryId, DomainError, DomainResult, EmployeeId, ItemId};

use crate::category::CategorySelection;
use crate::movement::Direction;

const MAX_SKU_LEN: usize = 64;

/// Stock keeping unit, unique within an account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid("sku cannot be empty"));
        }
        if trimmed.len() > MAX_SKU_LEN {
            return Err(DomainError::invalid(format!(
                "sku cannot exceed {MAX_SKU_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Sku {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a stock adjustment was refused. The balance is left untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockRejection {
    /// An outgoing quantity exceeded the current balance.
    Insufficient { available: i64, requested: i64 },
    /// An incoming quantity would push the balance past `i64::MAX`.
    Overflow { available: i64, incoming: i64 },
}

/// Stock item row.
///
/// `stock` is a derived counter: it always equals the signed sum of the item's
/// ledger movements and never drops below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub account_id: AccountId,
    pub creator_id: Option<EmployeeId>,
    pub sku: Sku,
    pub name: String,
    pub description: Option<String>,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn is_owned_by(&self, account_id: AccountId) -> bool {
        self.account_id == account_id
    }

    /// Balance after applying `delta`, or why it cannot be applied.
    pub fn balance_after(&self, delta: i64) -> Result<i64, StockRejection> {
        match self.stock.checked_add(delta) {
            Some(next) if next >= 0 => Ok(next),
            Some(_) => Err(StockRejection::Insufficient {
                available: self.stock,
                requested: delta.saturating_neg(),
            }),
            None if delta > 0 => Err(StockRejection::Overflow {
                available: self.stock,
                incoming: delta,
            }),
            None => Err(StockRejection::Insufficient {
                available: self.stock,
                requested: delta.saturating_neg(),
            }),
        }
    }

    /// Apply a signed delta in place. Only `stock` and `updated_at` change.
    pub fn adjust_stock(&mut self, delta: i64, at: DateTime<Utc>) -> Result<(), StockRejection> {
        self.stock = self.balance_after(delta)?;
        self.updated_at = at;
        Ok(())
    }

    pub fn apply_movement(
        &mut self,
        direction: Direction,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StockRejection> {
        self.adjust_stock(direction.signed(quantity), at)
    }
}

/// Request: create an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Absent means "no links"; unknown ids are ignored.
    #[serde(default)]
    pub category_ids: Option<Vec<CategoryId>>,
}

/// Validated insert payload for the item store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDraft {
    pub account_id: AccountId,
    pub creator_id: Option<EmployeeId>,
    pub sku: Sku,
    pub name: String,
    pub description: Option<String>,
}

impl NewItem {
    pub fn validate(&self, actor: &Actor) -> DomainResult<ItemDraft> {
        let sku = Sku::parse(&self.sku)?;
        let name = validate_name(&self.name)?;
        Ok(ItemDraft {
            account_id: actor.account_id(),
            creator_id: actor.creator_id(),
            sku,
            name,
            description: normalize_description(self.description.as_deref()),
        })
    }

    pub fn categories(&self) -> CategorySelection {
        CategorySelection::from_field(self.category_ids.clone())
    }
}

/// Request: partial item update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// A blank string clears the description.
    #[serde(default)]
    pub description: Option<String>,
    /// `None` leaves links alone; `Some(vec![])` detaches every category.
    #[serde(default)]
    pub category_ids: Option<Vec<CategoryId>>,
}

/// Validated column changes for the item store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemChanges {
    pub sku: Option<Sku>,
    pub name: Option<String>,
    /// `Some(None)` clears the column.
    pub description: Option<Option<String>>,
}

impl ItemChanges {
    pub fn is_empty(&self) -> bool {
        self.sku.is_none() && self.name.is_none() && self.description.is_none()
    }

    /// Apply onto an item row (stock is never touched here).
    pub fn apply_to(&self, item: &mut Item, at: DateTime<Utc>) {
        if let Some(sku) = &self.sku {
            item.sku = sku.clone();
        }
        if let Some(name) = &self.name {
            item.name = name.clone();
        }
        if let Some(description) = &self.description {
            item.description = description.clone();
        }
        item.updated_at = at;
    }
}

impl ItemPatch {
    pub fn validate(&self) -> DomainResult<ItemChanges> {
        let sku = self.sku.as_deref().map(Sku::parse).transpose()?;
        let name = self.name.as_deref().map(validate_name).transpose()?;
        Ok(ItemChanges {
            sku,
            name,
            description: description_change(self.description.as_deref()),
        })
    }

    pub fn categories(&self) -> CategorySelection {
        CategorySelection::from_field(self.category_ids.clone())
    }
}

pub(crate) fn validate_name(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid("name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn normalize_description(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|d| !d.is_empty())
        .map(ToString::to_string)
}

/// Patch form: an absent field is no change, a blank one clears the column.
pub(crate) fn description_change(raw: Option<&str>) -> Option<Option<String>> {
    raw.map(|d| normalize_description(Some(d)))
}
