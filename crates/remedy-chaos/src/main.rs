//! Remedy Chaos
//!
//! Entry point for the remedy controller chaos and remediation checks.

use clap::Parser;
use common::config::ObservabilityConfig;
use common::observability::init_tracing;
use remedy_chaos::cli::{self, Cli};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&ObservabilityConfig::from_env());

    match cli::run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(target: "remedy_chaos.cli", error = %format!("{e:#}"), "Run failed");
            ExitCode::FAILURE
        }
    }
}
