//! Command routing and execution

use anyhow::{Context, Result};

use crate::cli::args::{Commands, RunArgs};
use crate::config::ConfigLoader;
use crate::pipeline::{Pipeline, RunReport};
use crate::subprocess::SubprocessManager;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => {
            run_pipeline(args).await?;
            Ok(())
        }
    }
}

async fn run_pipeline(args: RunArgs) -> Result<RunReport> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let loader = ConfigLoader::new(&cwd)?;
    let config = loader
        .load(args.config.as_deref(), args.to_partial())
        .await
        .context("Invalid run configuration")?;

    tracing::debug!(
        workers = config.worker_count,
        "Resolved configuration: {:?}",
        config
    );

    let output_dir = config.output_dir.clone();
    let pipeline = Pipeline::new(config, SubprocessManager::production());
    let report = pipeline
        .run()
        .await
        .with_context(|| format!("Run in {} failed", output_dir.display()))?;

    tracing::info!(
        "Merged {} rows into {}",
        report.aggregate.total_rows,
        report.aggregate.output.display()
    );
    Ok(report)
}
