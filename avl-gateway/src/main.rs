//! avl-gateway - accepts Teltonika devices and forwards their records
//!
//! Configuration comes from an optional TOML file; command line flags and
//! `AVL_*` environment variables override it.

mod cli;

use anyhow::Context;
use avl::server::{ServerConfig, ServerListener};
use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    log::info!("avl-gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => {
            log::info!("Using config: {}", path.display());
            ServerConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    let config = cli.apply(config);

    match &config.sink_url {
        Some(url) => log::info!("Forwarding records to {}", url),
        None => log::warn!("No sink URL configured, records are only logged"),
    }

    let server = ServerListener::new(config).context("Invalid configuration")?;
    let listener = server.bind().await?;

    server
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Received shutdown signal");
        })
        .await?;

    log::info!(
        "{} device(s) seen, {} still connected",
        server.registry().len().await,
        server.registry().connected_count().await
    );
    Ok(())
}
