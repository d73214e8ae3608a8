//! Agronomicare web server
//!
//! Serves the single-page diagnosis form: upload a leaf photo, get the
//! predicted condition and the remedies recorded for it.

mod render;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agronomicare::utils::logging::{init_logging, LogConfig};
use clap::Parser;
use tracing::info;

use crate::state::{AppState, ServerConfig};

/// Agronomicare Server
#[derive(Parser, Debug)]
#[command(name = "agronomicare-server")]
#[command(version)]
#[command(about = "Web form for crop disease diagnosis and remedy recommendation")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Saved model artifact directory
    #[arg(long, env = "AGRONOMICARE_MODEL_DIR", default_value = "output/model")]
    model_dir: PathBuf,

    /// Remedy table (CSV keyed by class name)
    #[arg(long, env = "AGRONOMICARE_REMEDIES", default_value = "data/pesticides_dataset.csv")]
    remedies: PathBuf,

    /// Directory with the sidebar example photos, served under /images
    #[arg(long, env = "AGRONOMICARE_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,

    /// Deployment class catalog (JSON list) checked against the model
    #[arg(long, env = "AGRONOMICARE_CATALOG")]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_env_override()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    let config = ServerConfig {
        model_dir: cli.model_dir,
        remedies_path: cli.remedies,
        images_dir: cli.images_dir,
        catalog_path: cli.catalog,
    };

    info!("Agronomicare Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model dir:  {:?}", config.model_dir);
    info!("  Remedies:   {:?}", config.remedies_path);
    info!("  Images dir: {:?}", config.images_dir);

    let state = Arc::new(AppState::from_config(&config)?);
    let app = routes::router(state, &config.images_dir);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
