//! Pipeline server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelpipe_pipeline::{Pipeline, PipelineConfig};
use reelpipe_server::{liveness_router, readiness_router, AppState, ServerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    info!("Starting reelpipe-server");

    let server_config = ServerConfig::from_env();
    let pipeline_config = PipelineConfig::from_env();
    info!(
        host = %server_config.host,
        liveness_port = server_config.liveness_port,
        readiness_port = server_config.readiness_port,
        workers = pipeline_config.workers,
        "Server config loaded"
    );

    let pipeline = match Pipeline::new(pipeline_config).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to initialize pipeline: {e}");
            std::process::exit(1);
        }
    };
    pipeline.start().await;

    let state = AppState::new(Arc::clone(&pipeline));

    let liveness_addr: SocketAddr = format!("{}:{}", server_config.host, server_config.liveness_port)
        .parse()
        .expect("Invalid liveness bind address");
    let readiness_addr: SocketAddr =
        format!("{}:{}", server_config.host, server_config.readiness_port)
            .parse()
            .expect("Invalid readiness bind address");

    let (shutdown_tx, _) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C handler");
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let liveness = serve(
        liveness_addr,
        liveness_router(state.clone()),
        shutdown_tx.subscribe(),
    );
    let readiness = serve(
        readiness_addr,
        readiness_router(state),
        shutdown_tx.subscribe(),
    );

    if let Err(e) = tokio::try_join!(liveness, readiness) {
        error!("Server error: {e}");
        std::process::exit(1);
    }

    // Listeners are down; let in-flight jobs finish before exiting.
    pipeline.shutdown().await;

    info!("Server shutdown complete");
}

async fn serve(
    addr: SocketAddr,
    app: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reelpipe=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
