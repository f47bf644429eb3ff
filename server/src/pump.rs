//! # Byte Pump
//!
//! Once a session is paired and the dial handshake succeeds, the agent
//! stream and the accepted TCP connection are spliced together: bytes
//! read from one side are forwarded as `Data` frames on the other, and a
//! half-close on either side propagates to the other (§4.4/§4.5).
//!
//! The TCP side is wrapped in an `Arc` rather than split into owned
//! halves so both directions can issue an independent `shutdown(Write)` /
//! `shutdown(Read)` on the same socket without fighting over ownership —
//! `&TcpStream` already implements `AsyncRead`/`AsyncWrite`.

use std::net::Shutdown;
use std::sync::Arc;

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use tunnel_protocol::{ToAgent, ToGateway, DATA_CHUNK_SIZE};

use crate::agent::{recv_frame, send_frame, WsSink, WsStream};

/// Runs both pump directions to completion. Returns once the session is
/// fully over: both the TCP connection and the agent stream have seen
/// their data exhausted or closed.
pub async fn run(sink: WsSink, stream: WsStream, tcp: TcpStream) {
    let tcp = Arc::new(tcp);

    let inbound = tokio::spawn(run_inbound(stream, tcp.clone()));
    let outbound = tokio::spawn(run_outbound(sink, tcp));

    let (inbound_res, outbound_res) = tokio::join!(inbound, outbound);
    if let Err(e) = inbound_res {
        warn!(error = %e, "inbound pump task panicked");
    }
    if let Err(e) = outbound_res {
        warn!(error = %e, "outbound pump task panicked");
    }
}

/// Agent stream -> TCP. Consumes `Data` frames until the agent reports a
/// plain close, an error, or the stream itself ends, then half-closes the
/// TCP connection's write side.
async fn run_inbound(mut stream: WsStream, tcp: Arc<TcpStream>) {
    loop {
        match recv_frame::<ToGateway>(&mut stream).await {
            Ok(Some(frame)) if frame.is_plain_close() => {
                debug!("agent closed its write side");
                break;
            }
            Ok(Some(ToGateway::Data { data, closed, error })) => {
                if !error.is_empty() {
                    warn!(error = %error, "agent reported a remote error, ending session");
                    break;
                }
                if !data.is_empty() {
                    if let Err(e) = (&*tcp).write_all(&data).await {
                        debug!(error = %e, "local write failed, ending inbound pump");
                        break;
                    }
                }
                if closed {
                    debug!("agent signaled half-close");
                    break;
                }
            }
            Ok(Some(ToGateway::DialResponse { .. })) => {
                warn!("unexpected second DialResponse from agent, ending session");
                break;
            }
            Ok(None) => {
                debug!("agent stream ended");
                break;
            }
            Err(e) => {
                warn!(error = %e, "error reading from agent stream");
                break;
            }
        }
    }

    if let Err(e) = SockRef::from(&*tcp).shutdown(Shutdown::Write) {
        debug!(error = %e, "local write-shutdown failed (connection likely already gone)");
    }
}

/// TCP -> agent stream. Reads up to `DATA_CHUNK_SIZE` bytes at a time and
/// forwards each chunk as a `Data` frame, then half-closes the agent's
/// read side by sending a final `closed: true` frame.
async fn run_outbound(mut sink: WsSink, tcp: Arc<TcpStream>) {
    let mut buf = vec![0u8; DATA_CHUNK_SIZE];

    loop {
        match (&*tcp).read(&mut buf).await {
            Ok(0) => {
                debug!("local connection reached EOF");
                let _ = send_frame(
                    &mut sink,
                    &ToAgent::Data {
                        data: Vec::new(),
                        closed: true,
                        error: String::new(),
                    },
                )
                .await;
                break;
            }
            Ok(n) => {
                if send_frame(
                    &mut sink,
                    &ToAgent::Data {
                        data: buf[..n].to_vec(),
                        closed: false,
                        error: String::new(),
                    },
                )
                .await
                .is_err()
                {
                    debug!("agent stream write failed, ending outbound pump");
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "local read failed, reporting to agent");
                let _ = send_frame(
                    &mut sink,
                    &ToAgent::Data {
                        data: Vec::new(),
                        closed: true,
                        error: e.to_string(),
                    },
                )
                .await;
                break;
            }
        }
    }

    if let Err(e) = SockRef::from(&*tcp).shutdown(Shutdown::Read) {
        debug!(error = %e, "local read-shutdown failed (connection likely already gone)");
    }
}
