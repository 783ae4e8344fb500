//! Infrastructure layer: storage backends, the audit feed hand-off, configuration,
//! and the services that orchestrate the inventory core.

pub mod config;
pub mod error;
pub mod feed;
pub mod services;
pub mod store;


pub use config::{ConfigError, StockflowConfig};
pub use error::StoreError;
pub use feed::{
    DEFAULT_FEED_QUEUE_CAPACITY, FeedPublisher, FeedRetry, FeedWorker, FeedWorkerStats, feed_channel,
};
pub use services::{
    CategoryCatalog, CategoryLinkReconciler, CostAggregator, ItemCatalog, ItemValuation, ItemView,
    MovementApplicator,
};
pub use store::{
    CategoryStore, FeedStore, InMemoryStore, InventoryStore, ItemStore, MovementLedger,
    PostgresStore, StockTransaction,
};
