//! Movement Applicator: applies stock movement batches against item balances.
//!
//! ## Per-line pipeline
//!
//! ```text
//! MovementLine
//!   ↓
//! 1. lock_item (absent → UnknownItem, other account → NotOwned)
//!   ↓
//! 2. adjust_stock_if_sufficient (would go negative → InsufficientStock,
//!    past i64::MAX → StockLimitExceeded)
//!   ↓
//! 3. append_movement (price kept on IN only)
//! ```
//!
//! Steps 1-3 for a line always run inside one [`StockTransaction`], so the
//! balance update and its ledger row commit or roll back together, and no
//! other batch can adjust the same item in between.
//!
//! ## Policies
//!
//! - [`BatchPolicy::BestEffort`]: one transaction per line. Rejected lines
//!   are dropped, accepted lines stay committed.
//! - [`BatchPolicy::AllOrNothing`]: one transaction for the whole batch. A
//!   single rejected line rolls everything back and the remaining lines are
//!   reported as [`LineOutcome::RolledBack`].
//!
//! Rejections are never errors. A batch with zero accepted lines still
//! succeeds and emits no feed event.
//!
//! ## Store faults
//!
//! A storage fault aborts the batch with `DATABASE_ERROR`. The line being
//! processed is rolled back. Under best-effort, lines committed before the
//! fault stay committed and are still announced on the feed.

use std::sync::Arc;

use tracing::{Span, debug, field, info, instrument, warn};

use stockflow_core::{Actor, DomainResult, ItemId, MovementId};
use stockflow_events::{FeedEvent, FeedKind, FeedReference, FeedSink};
use stockflow_inventory::{
    BatchOutcome, BatchPolicy, LineOutcome, Movement, MovementBatch, MovementLine, NewMovement,
    RejectReason,
};

use super::owned;
use crate::error::StoreError;
use crate::store::{InventoryStore, StockTransaction};

enum LineStep {
    Applied(Movement),
    Rejected(RejectReason),
}

pub struct MovementApplicator<S, F> {
    store: Arc<S>,
    feed: F,
    policy: BatchPolicy,
}

impl<S: InventoryStore, F: FeedSink> MovementApplicator<S, F> {
    pub fn new(store: Arc<S>, feed: F) -> Self {
        Self {
            store,
            feed,
            policy: BatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Apply a validated batch on behalf of `actor`.
    ///
    /// Returns one outcome per submitted line, in submission order.
    #[instrument(
        skip(self, actor, batch),
        fields(
            account_id = %actor.account_id(),
            policy = self.policy.as_str(),
            lines = batch.len(),
            accepted = field::Empty
        ),
        err
    )]
    pub async fn apply(&self, actor: &Actor, batch: &MovementBatch) -> DomainResult<BatchOutcome> {
        let outcome = match self.policy {
            BatchPolicy::BestEffort => self.apply_best_effort(actor, batch).await?,
            BatchPolicy::AllOrNothing => self.apply_all_or_nothing(actor, batch).await?,
        };

        Span::current().record("accepted", outcome.accepted_count());
        self.announce(actor, &outcome, batch.len());
        Ok(outcome)
    }

    async fn apply_best_effort(
        &self,
        actor: &Actor,
        batch: &MovementBatch,
    ) -> DomainResult<BatchOutcome> {
        let mut lines = Vec::with_capacity(batch.len());

        for (idx, line) in batch.lines().iter().enumerate() {
            match self.apply_isolated(actor, line).await {
                Ok(outcome) => {
                    if let LineOutcome::Rejected { rejection } = &outcome {
                        warn!(line = idx, item_id = %line.item_id, ?rejection, "movement line dropped");
                    }
                    lines.push(outcome);
                }
                Err(err) => {
                    warn!(line = idx, item_id = %line.item_id, "store fault; aborting batch");
                    let committed = BatchOutcome::new(lines);
                    self.announce(actor, &committed, batch.len());
                    return Err(err.into());
                }
            }
        }

        Ok(BatchOutcome::new(lines))
    }

    async fn apply_isolated(
        &self,
        actor: &Actor,
        line: &MovementLine,
    ) -> Result<LineOutcome, StoreError> {
        let mut tx = self.store.begin().await?;
        match apply_line(&mut tx, actor, line).await? {
            LineStep::Applied(movement) => {
                tx.commit().await?;
                Ok(LineOutcome::Accepted { movement })
            }
            LineStep::Rejected(rejection) => {
                tx.rollback().await?;
                Ok(LineOutcome::Rejected { rejection })
            }
        }
    }

    async fn apply_all_or_nothing(
        &self,
        actor: &Actor,
        batch: &MovementBatch,
    ) -> DomainResult<BatchOutcome> {
        let mut tx = self.store.begin().await?;
        let mut steps = Vec::with_capacity(batch.len());
        for line in batch.lines() {
            steps.push(apply_line(&mut tx, actor, line).await?);
        }

        let rejected = steps
            .iter()
            .filter(|s| matches!(s, LineStep::Rejected(_)))
            .count();

        if rejected > 0 {
            tx.rollback().await?;
            warn!(rejected, "batch rolled back");
            let lines = steps
                .into_iter()
                .map(|step| match step {
                    LineStep::Applied(_) => LineOutcome::RolledBack,
                    LineStep::Rejected(rejection) => LineOutcome::Rejected { rejection },
                })
                .collect();
            return Ok(BatchOutcome::new(lines));
        }

        tx.commit().await?;
        let lines = steps
            .into_iter()
            .filter_map(|step| match step {
                LineStep::Applied(movement) => Some(LineOutcome::Accepted { movement }),
                LineStep::Rejected(_) => None,
            })
            .collect();
        Ok(BatchOutcome::new(lines))
    }

    /// One feed event per batch, only when something committed.
    fn announce(&self, actor: &Actor, outcome: &BatchOutcome, submitted: usize) {
        let accepted = outcome.accepted();
        let Some(first) = accepted.first() else {
            debug!("no lines accepted; no feed event");
            return;
        };

        info!(
            accepted = accepted.len(),
            submitted,
            first_movement_id = %first.id(),
            "movement batch applied"
        );
        self.feed.emit(
            FeedEvent::new(
                actor.account_id(),
                actor.creator_id(),
                FeedKind::Movement,
                FeedReference::Movement(first.id()),
            )
            .with_message(format!(
                "{} of {} movement lines applied",
                accepted.len(),
                submitted
            )),
        );
    }

    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn movement(&self, actor: &Actor, id: MovementId) -> DomainResult<Movement> {
        let row = self.store.get_movement(id).await?;
        owned(actor, row, Movement::account_id)
    }

    /// Ledger rows for one item, newest first.
    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn movements_for_item(
        &self,
        actor: &Actor,
        item_id: ItemId,
    ) -> DomainResult<Vec<Movement>> {
        let item = self.store.find_item(item_id).await?;
        owned(actor, item, |i| i.account_id)?;
        Ok(self.store.movements_for_item(item_id).await?)
    }

    /// Every ledger row of the actor's account, newest first.
    #[instrument(skip(self, actor), fields(account_id = %actor.account_id()), err)]
    pub async fn movements_for_account(&self, actor: &Actor) -> DomainResult<Vec<Movement>> {
        Ok(self.store.movements_for_account(actor.account_id()).await?)
    }
}

async fn apply_line<T: StockTransaction>(
    tx: &mut T,
    actor: &Actor,
    line: &MovementLine,
) -> Result<LineStep, StoreError> {
    let Some(item) = tx.lock_item(line.item_id).await? else {
        return Ok(LineStep::Rejected(RejectReason::UnknownItem));
    };
    if !item.is_owned_by(actor.account_id()) {
        return Ok(LineStep::Rejected(RejectReason::NotOwned));
    }

    let movement = NewMovement::from_line(actor, line);
    if let Err(rejection) = tx
        .adjust_stock_if_sufficient(item.id, movement.signed_quantity())
        .await?
    {
        return Ok(LineStep::Rejected(rejection.into()));
    }

    let row = tx.append_movement(movement).await?;
    debug!(movement_id = %row.id(), item_id = %item.id, "movement appended");
    Ok(LineStep::Applied(row))
}
