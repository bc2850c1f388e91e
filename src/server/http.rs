use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::api::{self, AppState};
use crate::config::ConfigSource;
use crate::pipeline::Orchestrator;
use crate::stages;

/// Configuration for the pipeline server.
pub struct ServerConfig {
    pub port: u16,
    pub project_dir: PathBuf,
    pub config_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            project_dir: PathBuf::from("."),
            config_path: crate::config::default_config_path(std::path::Path::new(".")),
            dev_mode: false,
        }
    }
}

/// Build the application router with request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the pipeline server and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let source = ConfigSource::from_file(config.project_dir.clone(), config.config_path.clone());
    let orchestrator = Orchestrator::new(source, stages::builtin())
        .context("Failed to initialise the pipeline orchestrator")?;
    info!(
        experiment_log = %orchestrator.store().path().display(),
        "Orchestrator ready"
    );

    let state = Arc::new(AppState { orchestrator });
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Housing pipeline running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
