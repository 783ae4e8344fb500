//! Command-line surface of the `stockflow` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use stockflow_core::{AccountId, Actor, CategoryId, EmployeeId, ItemId};
use stockflow_inventory::BatchPolicy;
use stockflow_observability::LogFormat;

/// Stock movements, balances and average cost over PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "stockflow", version, about)]
pub struct Cli {
    /// Account the command acts for.
    #[arg(short, long)]
    pub account: AccountId,

    /// Employee acting on behalf of the account.
    #[arg(short, long)]
    pub employee: Option<EmployeeId>,

    /// Overrides DATABASE_URL.
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Log output format (json or text).
    #[arg(long, global = true, default_value = "json")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn actor(&self) -> Actor {
        match self.employee {
            Some(employee) => Actor::employee(self.account, employee),
            None => Actor::account(self.account),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create tables and indexes.
    Migrate,

    /// Manage items.
    #[command(subcommand)]
    Item(ItemCommand),

    /// Manage categories.
    #[command(subcommand)]
    Category(CategoryCommand),

    /// Apply a JSON movement batch (`{"items": [...]}`) from a file or stdin.
    Apply {
        /// Batch file; reads stdin when omitted or `-`.
        file: Option<PathBuf>,

        /// Overrides STOCKFLOW_BATCH_POLICY.
        #[arg(long)]
        policy: Option<BatchPolicy>,
    },

    /// Show an item with its current stock.
    Stock { item: ItemId },

    /// List ledger rows, newest first.
    Ledger {
        #[arg(long)]
        item: Option<ItemId>,
    },

    /// Show the weighted average cost of an item.
    Cost { item: ItemId },

    /// List audit feed entries, newest first.
    Feed(FeedFilter),
}

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
    Create {
        #[arg(long)]
        sku: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Category to link; repeatable.
        #[arg(long = "category")]
        categories: Vec<CategoryId>,
    },
    Update {
        id: ItemId,
        #[arg(long)]
        sku: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Pass an empty value to clear the description.
        #[arg(long)]
        description: Option<String>,
        /// Replace links with these categories; repeatable.
        #[arg(long = "category", conflicts_with = "clear_categories")]
        categories: Vec<CategoryId>,
        /// Detach the item from every category.
        #[arg(long)]
        clear_categories: bool,
    },
    Delete {
        id: ItemId,
    },
    List {
        #[arg(long, conflicts_with = "uncategorized")]
        category: Option<CategoryId>,
        #[arg(long)]
        uncategorized: bool,
    },
}

impl ItemCommand {
    /// `None` leaves links alone, `Some(vec![])` clears them.
    pub fn category_field(categories: &[CategoryId], clear: bool) -> Option<Vec<CategoryId>> {
        if clear {
            Some(Vec::new())
        } else if categories.is_empty() {
            None
        } else {
            Some(categories.to_vec())
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: CategoryId,
        #[arg(long)]
        name: Option<String>,
        /// Pass an empty value to clear the description.
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: CategoryId,
    },
    List,
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct FeedFilter {
    #[arg(long)]
    pub item: Option<ItemId>,
    #[arg(long)]
    pub category: Option<CategoryId>,
    #[arg(long)]
    pub movement: Option<stockflow_core::MovementId>,
    #[arg(long = "by-employee")]
    pub by_employee: Option<EmployeeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apply_with_policy() {
        let cli = Cli::try_parse_from([
            "stockflow",
            "--account",
            "3",
            "--employee",
            "8",
            "apply",
            "batch.json",
            "--policy",
            "all-or-nothing",
        ])
        .unwrap();

        assert_eq!(cli.actor(), Actor::employee(AccountId::new(3), EmployeeId::new(8)));
        match cli.command {
            Command::Apply { file, policy } => {
                assert_eq!(file, Some(PathBuf::from("batch.json")));
                assert_eq!(policy, Some(BatchPolicy::AllOrNothing));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn repeated_categories_collect() {
        let cli = Cli::try_parse_from([
            "stockflow",
            "--account",
            "1",
            "item",
            "create",
            "--sku",
            "BOLT",
            "--name",
            "Bolt",
            "--category",
            "1",
            "--category",
            "2",
        ])
        .unwrap();

        let Command::Item(ItemCommand::Create { categories, .. }) = cli.command else {
            panic!("expected item create");
        };
        assert_eq!(categories, vec![CategoryId::new(1), CategoryId::new(2)]);
    }

    #[test]
    fn clear_conflicts_with_explicit_categories() {
        let err = Cli::try_parse_from([
            "stockflow",
            "--account",
            "1",
            "item",
            "update",
            "1",
            "--category",
            "2",
            "--clear-categories",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn category_field_keeps_absent_and_empty_apart() {
        assert_eq!(ItemCommand::category_field(&[], false), None);
        assert_eq!(ItemCommand::category_field(&[], true), Some(vec![]));
        assert_eq!(
            ItemCommand::category_field(&[CategoryId::new(4)], false),
            Some(vec![CategoryId::new(4)])
        );
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(Cli::try_parse_from(["stockflow", "--account", "1", "cost", "abc"]).is_err());
        assert!(Cli::try_parse_from(["stockflow", "cost", "5"]).is_err());
    }
}
