//! # Tunnel Gateway
//!
//! A reverse tunnel gateway: attached **agents** hold a long-lived
//! bidirectional WebSocket stream open to this process, and the managed
//! plane registers **tunnels** — a local listener plus a dial target in
//! the agent's own network. Each accepted local connection is paired
//! with an attached agent stream and proxied end to end.
//!
//! ## Architecture
//!
//! ```text
//! Local client ──TCP──► Gateway ──WS──► Agent ──TCP──► Dial target
//! ```
//!
//! ## Modules
//!
//! - [`config`]   — runtime configuration, env-var driven
//! - [`error`]    — the gateway's error taxonomy
//! - [`registry`] — the agent -> tunnels map and per-tunnel lifecycle
//! - [`acceptor`] — one task per tunnel, owning its listener
//! - [`pairing`]  — fair fan-in matching + dial handshake
//! - [`agent`]    — the agent WebSocket endpoint and wire framing
//! - [`pump`]     — the bidirectional byte pump
//! - [`api`]      — the managed-plane REST surface
//! - [`state`]    — shared application state
//!
//! The binary in `main.rs` is a thin wrapper around [`build_router`] and
//! [`serve_with_graceful_shutdown`] so integration tests can drive the
//! real router end to end without a separate process.

pub mod acceptor;
pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod pairing;
pub mod pump;
pub mod registry;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use crate::config::GatewayConfig;
pub use crate::state::AppState;

/// Assembles the gateway's axum router: the agent-facing WebSocket
/// endpoint and the managed-plane REST surface sharing one process and
/// one listening socket (§6 "one listening socket hosting both").
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/agent/stream", get(agent::stream_handler))
        .route("/api/tunnels", post(api::create_tunnel))
        .route("/api/tunnels/{listen}", delete(api::delete_tunnel))
        .route("/api/agents", get(api::list_agents))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves `app` on `listener` until SIGINT/SIGTERM, following §6's order
/// exactly: stop accepting new connections as soon as the signal arrives,
/// give in-flight sessions `grace` to finish on their own, then force-close
/// whatever is left.
pub async fn serve_with_graceful_shutdown(listener: TcpListener, app: Router, grace: Duration) {
    let stop = Arc::new(Notify::new());
    let stop_signal = stop.clone();

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop_signal.notified().await });
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => {
            if let Err(e) = result {
                warn!(error = %e, "gateway server error");
            }
        }
        _ = wait_for_os_signal() => {
            info!("shutdown signal received, no longer accepting new connections");
            stop.notify_one();

            match tokio::time::timeout(grace, &mut serve).await {
                Ok(Ok(())) => info!("graceful shutdown completed"),
                Ok(Err(e)) => warn!(error = %e, "gateway server error during shutdown"),
                Err(_) => warn!(?grace, "grace period elapsed, forcing remaining sessions closed"),
            }
        }
    }
}

/// Resolves on SIGINT (or, on Unix, SIGTERM).
async fn wait_for_os_signal() {
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
