//! Builds a batch of construction activities and prints the run summary.
//!
//! ```text
//! construction-runner [jobs.json]
//! ```
//!
//! Without a jobs file a small sample batch is built. Logs go to stderr
//! (`RUST_LOG` overrides the default `info` level); the summary JSON goes to
//! stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

mod config;
mod demo;
mod error;
mod pipeline;

use config::RunnerConfig;
use error::RunnerError;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), RunnerError> {
    let config = RunnerConfig::from_env()?;
    tracing::info!(
        "Storage backend: {:?}, database: {}",
        config.storage.backend,
        config.database.endpoint
    );

    let activities = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => pipeline::load_activities(&path)?,
        None => {
            tracing::info!("No jobs file given, building the sample batch");
            demo::sample_activities()
        }
    };

    let summary = pipeline::run(&config, activities).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
