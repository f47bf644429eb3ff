//! # Acceptor Loop
//!
//! One task per tunnel, owning that tunnel's `TcpListener` and the sending
//! half of its accept queue for its entire life. The accept queue has
//! exactly one producer by construction: the `Sender` is moved in here and
//! never cloned out.

use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::registry::TunnelEntry;

/// Runs until the listener errors or `tunnel.cancel` fires (tunnel
/// deleted), then closes the accept queue by dropping `accept_tx`.
pub async fn run(
    tunnel: std::sync::Arc<TunnelEntry>,
    listener: TcpListener,
    accept_tx: async_channel::Sender<TcpStream>,
    keepalive: Duration,
) {
    loop {
        tokio::select! {
            biased;

            _ = tunnel.cancelled() => {
                info!(listen = %tunnel.listen_addr, "tunnel listener closing on delete");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = configure_keepalive(&stream, keepalive) {
                            warn!(listen = %tunnel.listen_addr, peer = %peer, error = %e, "failed to set keepalive");
                        }
                        // Blocking send: backpressure is intentional (§4.2).
                        if accept_tx.send(stream).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(listen = %tunnel.listen_addr, error = %e, "accept failed, tunnel is terminal");
                        break;
                    }
                }
            }
        }
    }

    accept_tx.close();
}

fn configure_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(period);
    sock.set_tcp_keepalive(&keepalive)
}
