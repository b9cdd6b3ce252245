//! BOA server: HTTP bindings over the campaign operations plus the
//! background job worker.

use anyhow::Result;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use clap::Parser;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use boa::db::Db;
use boa::BoaConfig;
use boa_server::{routes, worker, AppState};

/// BOA server CLI
#[derive(Parser)]
#[command(name = "boa-server")]
#[command(about = "Server for Bayesian optimization campaigns")]
struct Cli {
    /// Port to listen on (overrides BOA_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Database URL (overrides BOA_DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Disable the background job worker
    #[arg(long)]
    no_worker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boa=info,boa_server=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = BoaConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }

    let db = Db::connect(&config.database_url, config.max_connections).await?;
    std::fs::create_dir_all(&config.checkpoint_dir)?;

    let state = AppState::new(db.pool().clone(), config.clone());

    // Background worker shares the pool and shuts down with the server
    let shutdown = CancellationToken::new();
    let worker_handle = if cli.no_worker {
        None
    } else {
        let worker_state = state.clone();
        let worker_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            worker::run(worker_state, worker_shutdown).await;
        }))
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE]);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("BOA server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker_handle {
        handle.await.ok();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
