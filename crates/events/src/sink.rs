//! Fire-and-forget feed sink.

use std::sync::{Arc, Mutex};

use crate::feed::FeedEvent;

/// Destination for audit feed events.
///
/// `emit` is infallible from the caller's point of view: a sink that cannot
/// deliver must log and move on, never fail the operation that produced the
/// event. Delivery is at-least-once intent, so consumers must tolerate
/// duplicates.
pub trait FeedSink: Send + Sync {
    fn emit(&self, event: FeedEvent);
}

impl<S> FeedSink for Arc<S>
where
    S: FeedSink + ?Sized,
{
    fn emit(&self, event: FeedEvent) {
        (**self).emit(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFeedSink;

impl FeedSink for NullFeedSink {
    fn emit(&self, event: FeedEvent) {
        tracing::trace!(event_type = %event.event_type(), "feed event discarded");
    }
}

/// In-memory sink that keeps every event, for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingFeedSink {
    events: Mutex<Vec<FeedEvent>>,
}

impl RecordingFeedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeedSink for RecordingFeedSink {
    fn emit(&self, event: FeedEvent) {
        // A poisoned lock still records; losing audit events silently is worse.
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedKind, FeedReference};
    use stockflow_core::{AccountId, ItemId};

    #[test]
    fn recording_sink_keeps_order() {
        let sink = Arc::new(RecordingFeedSink::new());
        let account = AccountId::new(1);

        sink.emit(FeedEvent::new(
            account,
            None,
            FeedKind::Created,
            FeedReference::Item(ItemId::new(1)),
        ));
        sink.emit(FeedEvent::new(
            account,
            None,
            FeedKind::Updated,
            FeedReference::Item(ItemId::new(1)),
        ));

        let kinds: Vec<_> = sink.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![FeedKind::Created, FeedKind::Updated]);
    }
}
