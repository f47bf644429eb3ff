//! # Gateway State
//!
//! Shared application state, cloned and passed to every axum handler —
//! the same shape as the teacher's `AppState`, but holding the tunnel
//! registry instead of a flat connection map.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::GatewayConfig;
use crate::registry::{AgentId, Registry};

#[derive(Clone)]
pub struct AppState {
    /// The tunnel registry: agent id -> tunnels that agent may service.
    pub registry: Arc<Registry>,

    /// Count of currently attached agent streams, keyed by agent id. Used
    /// only for the `/api/agents` observability endpoint — it reflects
    /// attached streams, not registered tunnels.
    attached: Arc<DashMap<AgentId, AtomicUsize>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(config)),
            attached: Arc::new(DashMap::new()),
        }
    }

    /// Marks one more stream attached for `agent_id`. Returns a guard that
    /// decrements the count when dropped, so every exit path (including a
    /// panic unwind) releases it.
    pub fn attach(&self, agent_id: AgentId) -> AttachGuard {
        self.attached
            .entry(agent_id.clone())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::SeqCst);
        AttachGuard {
            attached: self.attached.clone(),
            agent_id,
        }
    }

    /// Agent ids with at least one currently attached stream.
    pub fn attached_agent_ids(&self) -> Vec<AgentId> {
        self.attached
            .iter()
            .filter(|e| e.value().load(Ordering::SeqCst) > 0)
            .map(|e| e.key().clone())
            .collect()
    }
}

pub struct AttachGuard {
    attached: Arc<DashMap<AgentId, AtomicUsize>>,
    agent_id: AgentId,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.attached.get(&self.agent_id) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
