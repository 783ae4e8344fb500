//! Stock movements and the validated batch that produces them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{AccountId, Actor, DomainError, DomainResult, EmployeeId, ItemId, MovementId};

/// Direction of a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl Direction {
    /// Quantity with the sign this direction applies to a balance.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            Direction::In => quantity,
            Direction::Out => -quantity,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN" | "in" => Some(Direction::In),
            "OUT" | "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested line of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub item_id: ItemId,
    #[serde(rename = "movement_type")]
    pub direction: Direction,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl MovementLine {
    pub fn incoming(item_id: ItemId, quantity: i64, price: Decimal) -> Self {
        Self {
            item_id,
            direction: Direction::In,
            quantity,
            price: Some(price),
        }
    }

    pub fn outgoing(item_id: ItemId, quantity: i64) -> Self {
        Self {
            item_id,
            direction: Direction::Out,
            quantity,
            price: None,
        }
    }
}

/// Fractional digits a stored price keeps (`NUMERIC(20, 6)`).
const PRICE_SCALE: u32 = 6;

/// Exclusive upper bound on a unit price: 14 integer digits.
const PRICE_LIMIT: i64 = 100_000_000_000_000;

/// Non-empty, validated list of movement lines, kept in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementBatch {
    lines: Vec<MovementLine>,
}

impl MovementBatch {
    pub fn new(lines: Vec<MovementLine>) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::invalid("batch must contain at least one line"));
        }
        for (idx, line) in lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::invalid(format!(
                    "line {idx}: quantity must be positive"
                )));
            }
            if let Some(price) = line.price {
                if price.is_sign_negative() {
                    return Err(DomainError::invalid(format!(
                        "line {idx}: price cannot be negative"
                    )));
                }
                if price.normalize().scale() > PRICE_SCALE {
                    return Err(DomainError::invalid(format!(
                        "line {idx}: price cannot have more than {PRICE_SCALE} decimal places"
                    )));
                }
                if price >= Decimal::from(PRICE_LIMIT) {
                    return Err(DomainError::invalid(format!(
                        "line {idx}: price is out of range"
                    )));
                }
            }
        }
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[MovementLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<'de> Deserialize<'de> for MovementBatch {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            items: Vec<MovementLine>,
        }

        let raw = Raw::deserialize(deserializer)?;
        MovementBatch::new(raw.items).map_err(serde::de::Error::custom)
    }
}

/// Ledger append payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub account_id: AccountId,
    pub item_id: ItemId,
    pub creator_id: Option<EmployeeId>,
    pub direction: Direction,
    pub quantity: i64,
    pub price: Option<Decimal>,
}

impl NewMovement {
    /// Price is only kept on incoming lines; it is meaningless for withdrawals.
    pub fn from_line(actor: &Actor, line: &MovementLine) -> Self {
        Self {
            account_id: actor.account_id(),
            item_id: line.item_id,
            creator_id: actor.creator_id(),
            direction: line.direction,
            quantity: line.quantity,
            price: match line.direction {
                Direction::In => line.price,
                Direction::Out => None,
            },
        }
    }

    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}

/// Immutable ledger row.
///
/// No setters: corrections are new, compensating rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    id: MovementId,
    account_id: AccountId,
    item_id: ItemId,
    creator_id: Option<EmployeeId>,
    #[serde(rename = "movement_type")]
    direction: Direction,
    quantity: i64,
    price: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl Movement {
    /// Materialize a row the store has just written.
    pub fn record(id: MovementId, new: NewMovement, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id: new.account_id,
            item_id: new.item_id,
            creator_id: new.creator_id,
            direction: new.direction,
            quantity: new.quantity,
            price: new.price,
            created_at,
        }
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn creator_id(&self) -> Option<EmployeeId> {
        self.creator_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}
