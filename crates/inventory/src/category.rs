use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AccountId, Actor, CategoryId, DomainResult, EmployeeId};

use crate::item::{description_change, normalize_description, validate_name};

/// Category row. Linked many-to-many with items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub account_id: AccountId,
    pub creator_id: Option<EmployeeId>,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn is_owned_by(&self, account_id: AccountId) -> bool {
        self.account_id == account_id
    }
}

/// Request: create a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDraft {
    pub account_id: AccountId,
    pub creator_id: Option<EmployeeId>,
    pub name: String,
    pub description: Option<String>,
}

impl NewCategory {
    pub fn validate(&self, actor: &Actor) -> DomainResult<CategoryDraft> {
        Ok(CategoryDraft {
            account_id: actor.account_id(),
            creator_id: actor.creator_id(),
            name: validate_name(&self.name)?,
            description: normalize_description(self.description.as_deref()),
        })
    }
}

/// Request: partial category update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default)]
    pub name: Option<String>,
    /// A blank string clears the description.
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryChanges {
    pub name: Option<String>,
    /// `Some(None)` clears the column.
    pub description: Option<Option<String>>,
}

impl CategoryChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }

    pub fn apply_to(&self, category: &mut Category, at: DateTime<Utc>) {
        if let Some(name) = &self.name {
            category.name = name.clone();
        }
        if let Some(description) = &self.description {
            category.description = description.clone();
        }
        category.updated_at = at;
    }
}

impl CategoryPatch {
    pub fn validate(&self) -> DomainResult<CategoryChanges> {
        Ok(CategoryChanges {
            name: self.name.as_deref().map(validate_name).transpose()?,
            description: description_change(self.description.as_deref()),
        })
    }
}

/// Desired category links for an item.
///
/// Callers must keep "field omitted" and "empty list" apart: the first leaves
/// links untouched, the second detaches the item from every category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySelection {
    Unchanged,
    Replace(BTreeSet<CategoryId>),
}

impl CategorySelection {
    pub fn from_field(field: Option<Vec<CategoryId>>) -> Self {
        match field {
            None => CategorySelection::Unchanged,
            Some(ids) => CategorySelection::Replace(ids.into_iter().collect()),
        }
    }

    pub fn clear() -> Self {
        CategorySelection::Replace(BTreeSet::new())
    }
}

/// Minimal set of link writes converging `existing` onto `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub to_add: BTreeSet<CategoryId>,
    pub to_remove: BTreeSet<CategoryId>,
}

impl LinkPlan {
    pub fn diff(existing: &BTreeSet<CategoryId>, desired: &BTreeSet<CategoryId>) -> Self {
        Self {
            to_add: desired.difference(existing).copied().collect(),
            to_remove: existing.difference(desired).copied().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    pub fn apply_to(&self, links: &mut BTreeSet<CategoryId>) {
        for id in &self.to_remove {
            links.remove(id);
        }
        links.extend(self.to_add.iter().copied());
    }
}
