//! `stockflow` command-line front end over the inventory services.

pub mod args;
pub mod run;

pub use args::Cli;
pub use run::{Services, describe_error, run};
