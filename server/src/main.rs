//! Process entry point: loads configuration, wires up tracing, and serves
//! the router built by [`tunnel_gateway::build_router`] until a shutdown
//! signal and grace period elapse.

use tracing::info;
use tunnel_gateway::{build_router, config::GatewayConfig, serve_with_graceful_shutdown, AppState};

#[tokio::main]
async fn main() {
    let config = GatewayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let bind_addr = config.bind_addr;
    let shutdown_grace = config.shutdown_grace;
    let state = AppState::new(config);
    let app = build_router(state);

    info!(%bind_addr, "tunnel gateway listening");

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("failed to bind gateway listen address");

    serve_with_graceful_shutdown(listener, app, shutdown_grace).await;
}
