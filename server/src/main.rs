mod config;
mod error;
mod rest;

use clap::Parser;
use nbase_coordinator::Database;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nbase-server", about = "Embeddable vector database server")]
struct Cli {
    /// Path to an optional YAML config file, merged over the built-in
    /// defaults and then overridden by environment variables.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let server_config = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let db = match Database::open(server_config.database.clone()).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "database initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let app = rest::router(db.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", server_config.host, server_config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "nbase-server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = serve_result {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    if let Err(e) = db.close().await {
        error!(error = %e, "error while closing database during shutdown");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
