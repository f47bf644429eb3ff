//! # Pairing & Dial Handshake
//!
//! Matches an attached agent stream with an accepted local TCP connection
//! from one of that agent's tunnels, then runs the `DialRequest` /
//! `DialResponse` handshake over the stream before handing off to the byte
//! pump.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::TcpStream;
use tracing::debug;
use tunnel_protocol::ToGateway;

use crate::agent::{recv_frame, send_frame, WsSink, WsStream};
use crate::error::GatewayError;
use crate::registry::{AgentId, Registry, TunnelEntry};

/// How long to wait on a per-agent change notification before refreshing
/// the snapshot anyway (§4.3: "bounded-backoff poll").
const REFRESH_POLL: Duration = Duration::from_millis(250);

/// Blocks until an accepted TCP connection is available from some tunnel
/// registered to `agent_id`, racing every live accept queue fairly.
///
/// Re-snapshots whenever a queue turns out to be closed (its tunnel went
/// away) or whenever the agent's tunnel set changes, so newly created
/// tunnels are picked up within bounded latency without ever losing an
/// already-queued connection.
pub async fn wait_for_work(
    registry: &Registry,
    agent_id: &AgentId,
) -> (Arc<TunnelEntry>, TcpStream) {
    loop {
        let mut entries = registry.snapshot(agent_id);
        let changed = registry.change_notifier(agent_id);

        if entries.is_empty() {
            tokio::select! {
                _ = changed.notified() => {}
                _ = tokio::time::sleep(REFRESH_POLL) => {}
            }
            continue;
        }

        // Randomize poll order each round so no single tunnel is favored
        // when several accept queues are simultaneously ready (§4.3 "ties
        // broken randomly among ready channels").
        entries.shuffle(&mut rand::thread_rng());

        let recv_futs = entries
            .iter()
            .map(|entry| {
                let entry = entry.clone();
                Box::pin(async move { entry.accept_rx.recv().await })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = _> + Send>>
            })
            .collect::<Vec<_>>();

        tokio::select! {
            (result, idx, _remaining) = futures::future::select_all(recv_futs) => {
                match result {
                    Ok(stream) => return (entries[idx].clone(), stream),
                    Err(_closed) => {
                        debug!(agent_id = %agent_id, "an accept queue closed while waiting, refreshing");
                        continue;
                    }
                }
            }
            _ = changed.notified() => continue,
            _ = tokio::time::sleep(REFRESH_POLL) => continue,
        }
    }
}

/// Sends one `DialRequest` and waits for the matching `DialResponse`.
/// Any other frame, or the stream closing first, is a protocol error.
pub async fn dial_handshake(
    sink: &mut WsSink,
    stream: &mut WsStream,
    dial: &str,
) -> Result<(), GatewayError> {
    send_frame(sink, &tunnel_protocol::ToAgent::DialRequest { dial: dial.to_string() }).await?;

    match recv_frame::<ToGateway>(stream).await? {
        Some(ToGateway::DialResponse { error }) if error.is_empty() => Ok(()),
        Some(ToGateway::DialResponse { error }) => Err(GatewayError::Remote(error)),
        Some(_) => Err(GatewayError::Protocol(
            "expected DialResponse as the first frame from the agent".to_string(),
        )),
        None => Err(GatewayError::Transport(
            "agent stream closed before sending DialResponse".to_string(),
        )),
    }
}
