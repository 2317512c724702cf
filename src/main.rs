mod main_runtime;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use exflow::cli::{commands, Cli, Commands};
use exflow::config::AppConfig;
use exflow::services::runner;
use main_runtime::{init_logging, init_logging_simple};

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load config from {}", cli.config_dir.display()))?;
    if let Err(errors) = config.validate() {
        return Err(anyhow!("invalid configuration:\n  {}", errors.join("\n  ")));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Status { .. } => init_logging_simple(),
        _ => init_logging(&config.logging),
    }

    let store = commands::connect(&config).await?;

    match cli.command {
        Commands::Migrate => commands::migrate(&store).await?,
        Commands::Sync { chain } => commands::sync(&config, store, chain.into()).await?,
        Commands::Aggregate { window } => commands::aggregate(store, &window.windows()).await?,
        Commands::Alerts {
            window,
            baseline_days,
        } => commands::alerts(&config, store, &window.windows(), baseline_days).await?,
        Commands::Run => runner::run(&config, store).await?,
        Commands::Status { json } => commands::status(&store, json).await?,
    }

    Ok(())
}
