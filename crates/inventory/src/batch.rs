//! Batch policy and per-line results of applying a movement batch.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

use crate::item::StockRejection;
use crate::movement::Movement;

/// How a batch reacts to rejected lines.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Every accepted line commits on its own; rejected lines are dropped.
    #[default]
    BestEffort,
    /// One rejected line rolls back the whole batch.
    AllOrNothing,
}

impl BatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPolicy::BestEffort => "best_effort",
            BatchPolicy::AllOrNothing => "all_or_nothing",
        }
    }
}

impl FromStr for BatchPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(BatchPolicy::BestEffort),
            "all_or_nothing" => Ok(BatchPolicy::AllOrNothing),
            other => Err(DomainError::invalid(format!("unknown batch policy: {other}"))),
        }
    }
}

/// Why a line was dropped. Not an error: the batch itself still succeeds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    UnknownItem,
    NotOwned,
    InsufficientStock { available: i64, requested: i64 },
    /// The balance cannot hold the incoming quantity.
    StockLimitExceeded { available: i64, incoming: i64 },
}

impl From<StockRejection> for RejectReason {
    fn from(rejection: StockRejection) -> Self {
        match rejection {
            StockRejection::Insufficient {
                available,
                requested,
            } => RejectReason::InsufficientStock {
                available,
                requested,
            },
            StockRejection::Overflow {
                available,
                incoming,
            } => RejectReason::StockLimitExceeded {
                available,
                incoming,
            },
        }
    }
}

/// Result for one submitted line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LineOutcome {
    Accepted { movement: Movement },
    Rejected { rejection: RejectReason },
    /// Would have been accepted, but the all-or-nothing batch was aborted.
    RolledBack,
}

impl LineOutcome {
    pub fn movement(&self) -> Option<&Movement> {
        match self {
            LineOutcome::Accepted { movement } => Some(movement),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.movement().is_some()
    }
}

/// One outcome per submitted line, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    lines: Vec<LineOutcome>,
}

impl BatchOutcome {
    pub fn new(lines: Vec<LineOutcome>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[LineOutcome] {
        &self.lines
    }

    /// Committed movements, in submission order.
    pub fn accepted(&self) -> Vec<&Movement> {
        self.lines.iter().filter_map(LineOutcome::movement).collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_accepted()).count()
    }

    /// `(line index, reason)` for each dropped line.
    pub fn rejected(&self) -> Vec<(usize, RejectReason)> {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(idx, l)| match l {
                LineOutcome::Rejected { rejection } => Some((idx, *rejection)),
                _ => None,
            })
            .collect()
    }

    /// True when nothing was committed. Callers detect total rejection this way;
    /// it is not an error.
    pub fn is_empty(&self) -> bool {
        self.accepted_count() == 0
    }

    pub fn into_lines(self) -> Vec<LineOutcome> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{Direction, NewMovement};
    use chrono::Utc;
    use stockflow_core::{AccountId, ItemId, MovementId};

    fn movement(id: i64) -> Movement {
        Movement::record(
            MovementId::new(id),
            NewMovement {
                account_id: AccountId::new(1),
                item_id: ItemId::new(1),
                creator_id: None,
                direction: Direction::In,
                quantity: 1,
                price: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!("best-effort".parse::<BatchPolicy>().unwrap(), BatchPolicy::BestEffort);
        assert_eq!(
            "ALL_OR_NOTHING".parse::<BatchPolicy>().unwrap(),
            BatchPolicy::AllOrNothing
        );
        assert!("sometimes".parse::<BatchPolicy>().is_err());
    }

    #[test]
    fn outcome_reports_accepted_and_rejected_separately() {
        let outcome = BatchOutcome::new(vec![
            LineOutcome::Accepted { movement: movement(1) },
            LineOutcome::Rejected {
                rejection: RejectReason::InsufficientStock {
                    available: 2,
                    requested: 5,
                },
            },
            LineOutcome::Rejected {
                rejection: RejectReason::UnknownItem,
            },
        ]);

        assert_eq!(outcome.accepted_count(), 1);
        assert_eq!(outcome.accepted()[0].id(), MovementId::new(1));
        assert_eq!(
            outcome.rejected(),
            vec![
                (
                    1,
                    RejectReason::InsufficientStock {
                        available: 2,
                        requested: 5
                    }
                ),
                (2, RejectReason::UnknownItem),
            ]
        );
        assert!(!outcome.is_empty());
    }

    #[test]
    fn stock_overflow_maps_to_limit_reason() {
        let reason = RejectReason::from(StockRejection::Overflow {
            available: 7,
            incoming: i64::MAX,
        });
        assert_eq!(
            reason,
            RejectReason::StockLimitExceeded {
                available: 7,
                incoming: i64::MAX
            }
        );
        let json = serde_json::to_value(reason).unwrap();
        assert_eq!(json["reason"], "stock_limit_exceeded");
    }

    #[test]
    fn all_rejected_is_empty_not_error() {
        let outcome = BatchOutcome::new(vec![LineOutcome::Rejected {
            rejection: RejectReason::NotOwned,
        }]);
        assert!(outcome.is_empty());
        assert!(outcome.accepted().is_empty());
    }
}
