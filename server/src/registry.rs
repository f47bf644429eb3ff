//! # Tunnel Registry
//!
//! Concurrency-safe mapping from agent id to the set of tunnels that agent
//! may service. Each [`TunnelEntry`] owns a bound TCP listener (via its
//! acceptor task) and an unbuffered-ish accept queue; the registry itself
//! never touches a socket — it only tracks metadata and hands out channel
//! endpoints.
//!
//! [`DashMap`] gives per-shard read/write locking, the same trade-off the
//! teacher makes for its agent/connection/session registries: never hold a
//! lock across listener I/O or a byte pump.

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::acceptor;
use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Opaque, lowercased agent identifier. Validated once at construction so
/// the rest of the gateway can treat it as already-canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentId(String);

impl AgentId {
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return Err(GatewayError::Validation(
                "agent id must not be empty".to_string(),
            ));
        }
        Ok(Self(lowered))
    }
}

impl Deref for AgentId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of one tunnel (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Open,
    Closing,
    Closed,
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// A single exposed tunnel: the tuple (agent_id, dial, listener) plus the
/// accept queue the acceptor loop feeds and the pairing step drains.
pub struct TunnelEntry {
    pub agent_id: AgentId,
    pub dial: String,
    pub listen_addr: SocketAddr,
    pub accept_rx: async_channel::Receiver<TcpStream>,
    lifecycle: AtomicU8,
    cancel: CancellationToken,
}

impl TunnelEntry {
    /// Current lifecycle state. `Registry::snapshot` uses this to exclude
    /// a tunnel that is mid-deletion from new pairing even in the brief
    /// window before it is removed from the registry's list.
    pub fn state(&self) -> TunnelState {
        match self.lifecycle.load(Ordering::Acquire) {
            OPEN => TunnelState::Open,
            CLOSING => TunnelState::Closing,
            _ => TunnelState::Closed,
        }
    }

    /// Marks the tunnel as draining: set by `Registry::delete` before it
    /// closes the listener and drains the accept queue (§4.6 `Open` ->
    /// `Closing`).
    fn mark_closing(&self) {
        self.lifecycle.store(CLOSING, Ordering::Release);
    }

    /// Marks the tunnel fully torn down, once its acceptor loop has exited
    /// and its accept queue is closed (§4.6 `Closing` -> `Closed`).
    fn mark_closed(&self) {
        self.lifecycle.store(CLOSED, Ordering::Release);
    }

    /// Signals the acceptor loop to stop and close the listener. Unlike a
    /// bare `Notify`, a `CancellationToken` latches: a task that calls
    /// `cancelled()` *after* this fires still observes it immediately, so
    /// there is no missed-wakeup race with the acceptor's select loop.
    fn request_close(&self) {
        self.cancel.cancel();
    }

    /// Future that resolves once `request_close` has been called.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// Concurrency-safe mapping `agent_id -> Vec<TunnelEntry>`, plus a
/// per-agent change notifier so pairing loops waiting on an agent with no
/// tunnels yet can wake up as soon as one is created.
pub struct Registry {
    config: GatewayConfig,
    tunnels: DashMap<AgentId, Vec<Arc<TunnelEntry>>>,
    changed: DashMap<AgentId, Arc<Notify>>,
}

impl Registry {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            tunnels: DashMap::new(),
            changed: DashMap::new(),
        }
    }

    /// The per-agent "tunnels changed" notifier, created on first use.
    pub fn change_notifier(&self, agent_id: &AgentId) -> Arc<Notify> {
        self.changed
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Binds a listener, starts its acceptor loop, and registers the
    /// resulting tunnel under `agent_id`. Returns the OS-assigned address.
    pub async fn create(&self, agent_id: AgentId, dial: String) -> Result<SocketAddr, GatewayError> {
        if dial.trim().is_empty() {
            return Err(GatewayError::Validation(
                "dial target must not be empty".to_string(),
            ));
        }

        let bind_addr = SocketAddr::new(self.config.tunnel_bind_ip, 0);
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(GatewayError::Bind)?;
        let listen_addr = listener.local_addr().map_err(GatewayError::Bind)?;

        let (accept_tx, accept_rx) = async_channel::bounded(1);
        let entry = Arc::new(TunnelEntry {
            agent_id: agent_id.clone(),
            dial: dial.clone(),
            listen_addr,
            accept_rx,
            lifecycle: AtomicU8::new(OPEN),
            cancel: CancellationToken::new(),
        });

        let acceptor_entry = entry.clone();
        let keepalive = self.config.accept_keepalive;
        tokio::spawn(async move {
            acceptor::run(acceptor_entry.clone(), listener, accept_tx, keepalive).await;
            acceptor_entry.mark_closed();
            debug!(listen = %acceptor_entry.listen_addr, "tunnel acceptor exited");
        });

        self.tunnels
            .entry(agent_id.clone())
            .or_default()
            .push(entry);

        info!(agent_id = %agent_id, dial = %dial, listen = %listen_addr, "tunnel created");
        self.change_notifier(&agent_id).notify_waiters();

        Ok(listen_addr)
    }

    /// Finds the tunnel bound to `listen_addr`, closes its listener, drains
    /// (and closes) any not-yet-paired connection sitting in its accept
    /// queue, and removes it from the registry.
    pub async fn delete(&self, listen_addr: SocketAddr) -> Result<(), GatewayError> {
        let mut found: Option<Arc<TunnelEntry>> = None;

        for mut list in self.tunnels.iter_mut() {
            if let Some(pos) = list.iter().position(|t| t.listen_addr == listen_addr) {
                found = Some(list.remove(pos));
                break;
            }
        }

        let entry = found.ok_or(GatewayError::NotFound(listen_addr))?;

        // Drop the now-empty agent bucket so future snapshots don't carry
        // a dangling empty Vec around.
        self.tunnels.retain(|_, list| !list.is_empty());

        entry.mark_closing();
        entry.request_close();

        // The acceptor task drops its sender once it observes the cancel
        // signal, which closes accept_rx once drained. Keep receiving
        // until then so any not-yet-paired connection is closed instead
        // of leaking (§9 "Dropped connections on delete").
        while let Ok(stream) = entry.accept_rx.recv().await {
            drop(stream);
        }

        info!(listen = %listen_addr, "tunnel deleted");
        Ok(())
    }

    /// Read-only snapshot of the tunnels currently registered to an agent,
    /// excluding any entry already draining or torn down (§4.6): a tunnel
    /// caught mid-delete must not be handed a freshly accepted connection.
    /// Callers must treat this as an immutable list of channel endpoints —
    /// a tunnel may be deleted the instant after this call returns (§9
    /// "Registry aliasing").
    pub fn snapshot(&self, agent_id: &AgentId) -> Vec<Arc<TunnelEntry>> {
        self.tunnels
            .get(agent_id)
            .map(|list| {
                list.iter()
                    .filter(|t| t.state() == TunnelState::Open)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
