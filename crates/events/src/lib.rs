//! Audit feed vocabulary and the sink the inventory core writes into.
//!
//! The feed is a write-only side channel from the core's perspective: events
//! are handed to a [`FeedSink`] and the core never observes whether they were
//! persisted.

pub mod feed;
pub mod sink;

pub use feed::{FeedEntry, FeedEvent, FeedKind, FeedReference};
pub use sink::{FeedSink, NullFeedSink, RecordingFeedSink};
