//! Command execution for the `stockflow` binary.
//!
//! ```text
//! Cli ──► run() ──► PostgresStore ──► Services::execute(Command) ──► JSON on stdout
//!                         │                      │
//!                         └──── FeedWorker ◄─────┘ (FeedPublisher)
//! ```
//!
//! `Services` is generic over the store so the same dispatch runs against the
//! in-memory backend in tests.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use stockflow_core::{Actor, DomainError, DomainResult};
use stockflow_events::{FeedEntry, FeedReference, FeedSink};
use stockflow_infra::{
    CategoryCatalog, CategoryStore, ConfigError, CostAggregator, FeedStore, InventoryStore,
    ItemCatalog, MovementApplicator, PostgresStore, StockflowConfig, feed_channel,
};
use stockflow_inventory::{
    BatchPolicy, CategoryPatch, ItemPatch, MovementBatch, NewCategory, NewItem,
};

use crate::args::{CategoryCommand, Cli, Command, FeedFilter, ItemCommand};

/// Entry point behind `main`: connect, dispatch, print, drain the feed.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StockflowConfig::from_env()?;
    let url = match cli.database_url.as_deref() {
        Some(url) => url,
        None => config.require_database_url()?,
    };

    let store = Arc::new(
        PostgresStore::connect(url, config.max_connections)
            .await
            .context("connecting to database")?,
    );

    if let Command::Migrate = cli.command {
        store.migrate().await.context("applying schema")?;
        info!("schema applied");
        return Ok(());
    }

    let actor = cli.actor();
    let policy = match &cli.command {
        Command::Apply {
            policy: Some(policy),
            ..
        } => *policy,
        _ => config.batch_policy,
    };

    let (publisher, worker) = feed_channel(
        store.clone(),
        config.feed_retry.clone(),
        config.feed_queue_capacity,
    );
    let worker = worker.spawn();

    let services = Services::new(store, publisher, policy);
    let result = services.execute(&actor, cli.command).await;
    drop(services);

    let stats = worker.await.context("feed worker panicked")?;
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        retries = stats.retries,
        "feed drained"
    );

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// The service set one command runs against.
pub struct Services<S, F> {
    store: Arc<S>,
    items: ItemCatalog<S, F>,
    categories: CategoryCatalog<S, F>,
    movements: MovementApplicator<S, F>,
    costs: CostAggregator<S>,
}

impl<S, F> Services<S, F>
where
    S: InventoryStore + CategoryStore + FeedStore,
    F: FeedSink + Clone,
{
    pub fn new(store: Arc<S>, feed: F, policy: BatchPolicy) -> Self {
        Self {
            items: ItemCatalog::new(store.clone(), feed.clone()),
            categories: CategoryCatalog::new(store.clone(), feed.clone()),
            movements: MovementApplicator::new(store.clone(), feed).with_policy(policy),
            costs: CostAggregator::new(store.clone()),
            store,
        }
    }

    pub async fn execute(&self, actor: &Actor, command: Command) -> anyhow::Result<Value> {
        match command {
            Command::Migrate => Err(anyhow::anyhow!("migrate runs before services start")),
            Command::Item(cmd) => self.item(actor, cmd).await,
            Command::Category(cmd) => self.category(actor, cmd).await,
            Command::Apply { file, .. } => {
                let batch = read_batch(file.as_deref())?;
                json(self.movements.apply(actor, &batch).await)
            }
            Command::Stock { item } => json(self.items.get(actor, item).await),
            Command::Ledger { item: Some(item) } => {
                json(self.movements.movements_for_item(actor, item).await)
            }
            Command::Ledger { item: None } => {
                json(self.movements.movements_for_account(actor).await)
            }
            Command::Cost { item } => json(self.costs.average_cost(actor, item).await),
            Command::Feed(filter) => json(self.feed(actor, filter).await),
        }
    }

    async fn item(&self, actor: &Actor, cmd: ItemCommand) -> anyhow::Result<Value> {
        match cmd {
            ItemCommand::Create {
                sku,
                name,
                description,
                categories,
            } => {
                let new = NewItem {
                    sku,
                    name,
                    description,
                    category_ids: (!categories.is_empty()).then_some(categories),
                };
                json(self.items.create(actor, &new).await)
            }
            ItemCommand::Update {
                id,
                sku,
                name,
                description,
                categories,
                clear_categories,
            } => {
                let patch = ItemPatch {
                    sku,
                    name,
                    description,
                    category_ids: ItemCommand::category_field(&categories, clear_categories),
                };
                json(self.items.update(actor, id, &patch).await)
            }
            ItemCommand::Delete { id } => json(self.items.delete(actor, id).await),
            ItemCommand::List {
                category: Some(category),
                ..
            } => json(self.items.list_by_category(actor, category).await),
            ItemCommand::List {
                uncategorized: true,
                ..
            } => json(self.items.list_uncategorized(actor).await),
            ItemCommand::List { .. } => json(self.items.list(actor).await),
        }
    }

    async fn category(&self, actor: &Actor, cmd: CategoryCommand) -> anyhow::Result<Value> {
        match cmd {
            CategoryCommand::Create { name, description } => {
                let new = NewCategory { name, description };
                json(self.categories.create(actor, &new).await)
            }
            CategoryCommand::Update {
                id,
                name,
                description,
            } => {
                let patch = CategoryPatch { name, description };
                json(self.categories.update(actor, id, &patch).await)
            }
            CategoryCommand::Delete { id } => json(self.categories.delete(actor, id).await),
            CategoryCommand::List => json(self.categories.list(actor).await),
        }
    }

    /// Feed entries visible to the actor's account, newest first.
    async fn feed(&self, actor: &Actor, filter: FeedFilter) -> DomainResult<Vec<FeedEntry>> {
        let reference = match (filter.item, filter.category, filter.movement) {
            (Some(id), _, _) => Some(FeedReference::Item(id)),
            (_, Some(id), _) => Some(FeedReference::Category(id)),
            (_, _, Some(id)) => Some(FeedReference::Movement(id)),
            _ => None,
        };

        let entries = match (reference, filter.by_employee) {
            (Some(reference), _) => self.store.feed_for_reference(reference).await?,
            (None, Some(employee)) => self.store.feed_for_employee(employee).await?,
            (None, None) => self.store.feed_for_account(actor.account_id()).await?,
        };

        Ok(entries
            .into_iter()
            .filter(|entry| actor.owns(entry.event.account_id))
            .collect())
    }
}

fn json<T: Serialize>(result: DomainResult<T>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(result?)?)
}

/// Read a batch document from `path`, or stdin when absent or `-`.
pub fn read_batch(path: Option<&Path>) -> anyhow::Result<MovementBatch> {
    let raw = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading batch from stdin")?;
            buf
        }
    };
    parse_batch(&raw)
}

pub fn parse_batch(raw: &str) -> anyhow::Result<MovementBatch> {
    serde_json::from_str(raw)
        .map_err(|e| DomainError::invalid(e.to_string()))
        .context("parsing movement batch")
}

/// Exit-facing summary of a failure: the stable code plus a message.
pub fn describe_error(err: &anyhow::Error) -> (&'static str, String) {
    if let Some(domain) = err.downcast_ref::<DomainError>() {
        return (domain.code(), domain.to_string());
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return ("CONFIG_ERROR", err.to_string());
    }
    ("ERROR", format!("{err:#}"))
}
