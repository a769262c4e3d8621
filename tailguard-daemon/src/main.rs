use anyhow::{Context, Result};
use clap::Parser;

use tailguard_core::config::TailguardConfig;
use tailguard_daemon::cli::DaemonCli;
use tailguard_daemon::logging;
use tailguard_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = TailguardConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);

    if cli.validate {
        let patterns = orchestrator::validate_config(&config).await?;
        println!(
            "configuration OK: {} source(s), {} pattern(s)",
            config.monitor.sources.len(),
            patterns
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "tailguard-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.set_config_path(cli.config.clone());

    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %format!("{e:#}"), "tailguard-daemon exited with error");
        return Err(e);
    }

    tracing::info!("tailguard-daemon shut down");
    Ok(())
}
