//! # Managed-Plane REST API
//!
//! The control surface used to create and delete tunnels and to list
//! currently attached agents. Errors that are part of normal operation
//! (bad input, unknown listen address) are reported in-band via an
//! `error` field on a `200 OK` response rather than as HTTP error
//! statuses — only truly unexpected failures use one.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::GatewayError;
use crate::state::AppState;

/// Surfaces `e` in the response's `error` field (§4.5/§7: business-level
/// outcomes, never an HTTP error status). `create`/`delete` only ever
/// produce the in-band categories (`Validation`, `Bind`, `NotFound`), so a
/// non-in-band error here means a category was miscategorized upstream —
/// log it loudly rather than silently treating it the same way.
fn in_band_error(e: GatewayError) -> String {
    if !e.is_in_band() {
        error!(error = %e, "non-business error surfaced in-band by the managed-plane API");
    }
    e.to_string()
}

#[derive(Deserialize)]
pub struct CreateTunnelRequest {
    pub agent_id: String,
    pub dial: String,
}

#[derive(Serialize)]
pub struct CreateTunnelResponse {
    /// Empty when `error` is non-empty.
    pub listen: String,
    pub error: String,
}

#[derive(Serialize)]
pub struct DeleteTunnelResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct AgentListItem {
    pub agent_id: String,
}

/// `POST /api/tunnels` — registers a new tunnel for `agent_id` dialing
/// `dial`, binding a local listener and returning its address.
pub async fn create_tunnel(
    State(state): State<AppState>,
    Json(req): Json<CreateTunnelRequest>,
) -> Json<CreateTunnelResponse> {
    let agent_id = match crate::registry::AgentId::parse(&req.agent_id) {
        Ok(id) => id,
        Err(e) => {
            return Json(CreateTunnelResponse {
                listen: String::new(),
                error: in_band_error(e),
            })
        }
    };

    match state.registry.create(agent_id, req.dial).await {
        Ok(listen) => Json(CreateTunnelResponse {
            listen: listen.to_string(),
            error: String::new(),
        }),
        Err(e) => Json(CreateTunnelResponse {
            listen: String::new(),
            error: in_band_error(e),
        }),
    }
}

/// `DELETE /api/tunnels/{listen}` — tears down the tunnel bound to
/// `listen` (a `host:port` socket address), closing its listener and
/// draining any not-yet-paired accepted connection.
pub async fn delete_tunnel(
    State(state): State<AppState>,
    Path(listen): Path<String>,
) -> Json<DeleteTunnelResponse> {
    let addr = match listen.parse() {
        Ok(addr) => addr,
        Err(_) => {
            return Json(DeleteTunnelResponse {
                error: format!("invalid listen address {listen}"),
            })
        }
    };

    match state.registry.delete(addr).await {
        Ok(()) => Json(DeleteTunnelResponse {
            error: String::new(),
        }),
        Err(e) => Json(DeleteTunnelResponse {
            error: in_band_error(e),
        }),
    }
}

/// `GET /api/agents` — lists agent ids with at least one currently
/// attached stream.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentListItem>> {
    let agents = state
        .attached_agent_ids()
        .into_iter()
        .map(|id| AgentListItem {
            agent_id: id.to_string(),
        })
        .collect();
    Json(agents)
}
