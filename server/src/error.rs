//! # Gateway Error Taxonomy
//!
//! Mirrors the categories a caller actually needs to distinguish: input the
//! managed plane got wrong, resources the OS refused to hand out, wire-level
//! protocol violations from an attached agent, transport hiccups, and the
//! agent explicitly reporting a failure. Validation/Bind/NotFound are always
//! surfaced in-band (a response field), never as a transport-level error —
//! see `GatewayError::is_in_band`.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to bind tunnel listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("no tunnel registered for listen address {0}")]
    NotFound(SocketAddr),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("agent reported an error: {0}")]
    Remote(String),
}

impl GatewayError {
    /// `Validation`, `Bind`, and `NotFound` are business-level outcomes the
    /// managed plane reports in a response's `error` field rather than as a
    /// transport fault (§7 of the spec this crate implements).
    pub fn is_in_band(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation(_) | GatewayError::Bind(_) | GatewayError::NotFound(_)
        )
    }
}
