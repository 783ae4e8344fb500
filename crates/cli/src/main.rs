use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use stockflow_cli::{Cli, describe_error, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    stockflow_observability::init_with(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (code, message) = describe_error(&err);
            error!(code, error = %format!("{err:#}"), "command failed");
            eprintln!("{code}: {message}");
            ExitCode::FAILURE
        }
    }
}
