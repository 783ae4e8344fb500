use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{AccountId, CategoryId, EmployeeId, FeedEntryId, ItemId, MovementId};

/// What happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Created,
    Updated,
    Deleted,
    /// A movement batch was applied.
    Movement,
}

impl FeedKind {
    /// Stable name, also used as the persisted column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Created => "created",
            FeedKind::Updated => "updated",
            FeedKind::Deleted => "deleted",
            FeedKind::Movement => "movement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(FeedKind::Created),
            "updated" => Some(FeedKind::Updated),
            "deleted" => Some(FeedKind::Deleted),
            "movement" => Some(FeedKind::Movement),
            _ => None,
        }
    }
}

/// The resource an event points at.
///
/// Deleted resources are referenced by `None` plus a free-text message, since
/// their rows no longer exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum FeedReference {
    Item(ItemId),
    Category(CategoryId),
    Movement(MovementId),
    None,
}

impl FeedReference {
    /// `(reference_type, reference_id)` column pair.
    pub fn to_parts(&self) -> (&'static str, Option<i64>) {
        match self {
            FeedReference::Item(id) => ("item", Some(id.get())),
            FeedReference::Category(id) => ("category", Some(id.get())),
            FeedReference::Movement(id) => ("movement", Some(id.get())),
            FeedReference::None => ("none", None),
        }
    }

    pub fn from_parts(kind: &str, id: Option<i64>) -> Option<Self> {
        match (kind, id) {
            ("item", Some(id)) => Some(FeedReference::Item(ItemId::new(id))),
            ("category", Some(id)) => Some(FeedReference::Category(CategoryId::new(id))),
            ("movement", Some(id)) => Some(FeedReference::Movement(MovementId::new(id))),
            ("none", _) => Some(FeedReference::None),
            _ => None,
        }
    }
}

/// Event handed to the feed sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub account_id: AccountId,
    pub creator_id: Option<EmployeeId>,
    pub kind: FeedKind,
    pub reference: FeedReference,
    /// Snapshot of the referenced resource's name at the time of the event.
    pub name: Option<String>,
    pub description: Option<String>,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl FeedEvent {
    pub fn new(
        account_id: AccountId,
        creator_id: Option<EmployeeId>,
        kind: FeedKind,
        reference: FeedReference,
    ) -> Self {
        Self {
            account_id,
            creator_id,
            kind,
            reference,
            name: None,
            description: None,
            message: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_snapshot(mut self, name: impl Into<String>, description: Option<String>) -> Self {
        self.name = Some(name.into());
        self.description = description;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Dotted event name for logs (e.g. `feed.movement`).
    pub fn event_type(&self) -> String {
        format!("feed.{}", self.kind.as_str())
    }
}

/// A persisted feed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: FeedEntryId,
    #[serde(flatten)]
    pub event: FeedEvent,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            FeedKind::Created,
            FeedKind::Updated,
            FeedKind::Deleted,
            FeedKind::Movement,
        ] {
            assert_eq!(FeedKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FeedKind::parse("exploded"), None);
    }

    #[test]
    fn reference_serializes_tagged() {
        let json = serde_json::to_value(FeedReference::Movement(MovementId::new(7))).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "movement", "id": 7 }));
    }

    #[test]
    fn reference_column_pair() {
        let reference = FeedReference::Category(CategoryId::new(4));
        assert_eq!(reference.to_parts(), ("category", Some(4)));
        assert_eq!(FeedReference::from_parts("category", Some(4)), Some(reference));
        assert_eq!(FeedReference::from_parts("none", None), Some(FeedReference::None));
        assert_eq!(FeedReference::from_parts("item", None), None);
    }

    #[test]
    fn builder_sets_snapshot_and_message() {
        let ev = FeedEvent::new(
            AccountId::new(1),
            Some(EmployeeId::new(3)),
            FeedKind::Deleted,
            FeedReference::None,
        )
        .with_snapshot("Bolts", None)
        .with_message("deleted category Bolts");

        assert_eq!(ev.name.as_deref(), Some("Bolts"));
        assert_eq!(ev.message.as_deref(), Some("deleted category Bolts"));
        assert_eq!(ev.event_type(), "feed.deleted");
    }
}
