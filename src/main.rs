//! Strand server binary.
//!
//! Loads a script engine from a shared library and serves HTTP requests
//! through a fixed pool of engine threads.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use strand::engine::DylibEngine;
use strand::{StrandConfig, StrandError, StrandServer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "strand", version, about = "Serve HTTP through a thread-affine script engine pool")]
struct Cli {
    /// JSON config file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of engine worker threads.
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Script the engine runs for every request.
    #[arg(long)]
    handler: Option<String>,

    /// Engine shared library.
    #[arg(short, long)]
    engine: PathBuf,
}

impl Cli {
    fn into_config(self) -> Result<(StrandConfig, PathBuf), StrandError> {
        let mut config = match &self.config {
            Some(path) => StrandConfig::from_json_file(path)?,
            None => StrandConfig::default(),
        };
        if let Some(host) = self.host {
            config = config.host(host);
        }
        if let Some(port) = self.port {
            config = config.port(port);
        }
        if let Some(threads) = self.threads {
            config = config.workers(threads);
        }
        if let Some(handler) = self.handler {
            config = config.handler(handler);
        }
        config.validate()?;
        Ok((config, self.engine))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (config, engine_path) = Cli::parse().into_config()?;
    tracing::info!(
        "Starting strand with {} workers, engine {}",
        config.pool.workers,
        engine_path.display()
    );

    let engine = DylibEngine::load(&engine_path, &config.pool.handler)?;
    let server = StrandServer::new(config, Arc::new(engine))?;
    server.run_until(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
