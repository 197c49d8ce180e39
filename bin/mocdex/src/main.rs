//! mocdex deploys the order book exchange, its proxies and markets to a chain.

mod cli;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use cli::{BackendKind, Cli};
use mocdex_deploy::{
    ArtifactStore, Config, ConfigResolver, DeploymentBackend, DeploymentSequencer, RpcBackend,
    RunSummary, SimulatedBackend,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if !cli.config.exists() {
        tracing::warn!(
            config_path = %cli.config.display(),
            "Configuration file not found, using built-in defaults and environment"
        );
    }

    let config = ConfigResolver::from_file(&cli.config).resolve(&cli.network)?;

    if cli.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!(
        config_path = %cli.config.display(),
        network = %config.network,
        backend = %cli.backend,
        "Loaded deployment configuration"
    );

    let summary = match cli.backend {
        BackendKind::Simulated => deploy(&SimulatedBackend::default(), &config).await?,
        BackendKind::Rpc => {
            let backend = RpcBackend::connect(
                cli.rpc_url.clone(),
                ArtifactStore::new(&cli.artifacts),
                cli.from,
            )
            .await?
            .with_polling(Duration::from_millis(cli.poll_interval_ms), cli.max_polls);
            deploy(&backend, &config).await?
        }
    };

    println!("{}", summary.to_table());

    if let Some(path) = &cli.summary_out {
        summary.save_to_file(path)?;
        tracing::info!(path = %path.display(), "Run summary written");
    }

    Ok(())
}

async fn deploy<B: DeploymentBackend>(backend: &B, config: &Config) -> Result<RunSummary> {
    Ok(DeploymentSequencer::new(backend, config).run().await?)
}
