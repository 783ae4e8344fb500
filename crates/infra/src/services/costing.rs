//! Cost Aggregator.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use stockflow_core::{Actor, DomainResult, ItemId};
use stockflow_inventory::{Item, WeightedAverage};

use super::owned;
use crate::store::{ItemStore, MovementLedger};

/// Current weighted average cost of an item and the totals behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemValuation {
    pub item: Item,
    pub average_cost: Decimal,
    pub total_in_quantity: i64,
    pub total_in_value: Decimal,
    /// Signed sum over the ledger. Equals `item.stock` unless rows were
    /// written outside the applicator.
    pub net_balance: i64,
}

/// Read-only: derives cost from ledger rows on demand, never caches.
pub struct CostAggregator<S> {
    store: Arc<S>,
}

impl<S> Clone for CostAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ItemStore + MovementLedger> CostAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn average_cost(&self, actor: &Actor, item_id: ItemId) -> DomainResult<ItemValuation> {
        let item = owned(actor, self.store.find_item(item_id).await?, |i| i.account_id)?;
        let ledger = self.store.movements_for_item(item_id).await?;
        let totals = WeightedAverage::from_movements(&ledger)?;

        Ok(ItemValuation {
            item,
            average_cost: totals.average_cost(),
            total_in_quantity: totals.total_in_quantity,
            total_in_value: totals.total_in_value,
            net_balance: totals.net_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use stockflow_core::{AccountId, DomainError};
    use stockflow_events::NullFeedSink;
    use stockflow_inventory::{ItemDraft, MovementBatch, MovementLine, Sku};

    use crate::services::MovementApplicator;
    use crate::store::InMemoryStore;

    async fn seeded() -> (Arc<InMemoryStore>, MovementApplicator<InMemoryStore, NullFeedSink>, Item) {
        let store = InMemoryStore::arc();
        let item = store
            .insert_item(ItemDraft {
                account_id: AccountId::new(1),
                creator_id: None,
                sku: Sku::parse("NUT").unwrap(),
                name: "Nut".into(),
                description: None,
            })
            .await
            .unwrap();
        let applicator = MovementApplicator::new(store.clone(), NullFeedSink);
        (store, applicator, item)
    }

    #[tokio::test]
    async fn averages_then_zeroes_on_depletion() {
        let (store, applicator, item) = seeded().await;
        let actor = Actor::account(AccountId::new(1));
        let costs = CostAggregator::new(store);

        applicator
            .apply(
                &actor,
                &MovementBatch::new(vec![
                    MovementLine::incoming(item.id, 10, dec!(2)),
                    MovementLine::incoming(item.id, 5, dec!(4)),
                ])
                .unwrap(),
            )
            .await
            .unwrap();

        let valuation = costs.average_cost(&actor, item.id).await.unwrap();
        assert_eq!(valuation.average_cost.round_dp(2), dec!(2.67));
        assert_eq!(valuation.total_in_quantity, 15);
        assert_eq!(valuation.total_in_value, dec!(40));
        assert_eq!(valuation.net_balance, 15);
        assert_eq!(valuation.item.stock, 15);

        applicator
            .apply(
                &actor,
                &MovementBatch::new(vec![MovementLine::outgoing(item.id, 15)]).unwrap(),
            )
            .await
            .unwrap();

        let valuation = costs.average_cost(&actor, item.id).await.unwrap();
        assert_eq!(valuation.average_cost, Decimal::ZERO);
        assert_eq!(valuation.net_balance, 0);
    }

    #[tokio::test]
    async fn unknown_and_foreign_items_are_refused() {
        let (store, _applicator, item) = seeded().await;
        let costs = CostAggregator::new(store);

        let err = costs
            .average_cost(&Actor::account(AccountId::new(1)), ItemId::new(404))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);

        let err = costs
            .average_cost(&Actor::account(AccountId::new(2)), item.id)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::Unauthorized);
    }

    #[tokio::test]
    async fn history_beyond_decimal_range_is_refused_not_panicking() {
        let (store, applicator, item) = seeded().await;
        let actor = Actor::account(AccountId::new(1));
        let half = i64::MAX / 2;

        let outcome = applicator
            .apply(
                &actor,
                &MovementBatch::new(vec![
                    MovementLine::incoming(item.id, half, dec!(10000000000)),
                    MovementLine::incoming(item.id, half, dec!(10000000000)),
                ])
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.accepted_count(), 2);

        let err = CostAggregator::new(store)
            .average_cost(&actor, item.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
    }

    #[tokio::test]
    async fn item_without_history_costs_zero() {
        let (store, _applicator, item) = seeded().await;
        let valuation = CostAggregator::new(store)
            .average_cost(&Actor::account(AccountId::new(1)), item.id)
            .await
            .unwrap();
        assert_eq!(valuation.average_cost, Decimal::ZERO);
        assert_eq!(valuation.total_in_quantity, 0);
    }
}
