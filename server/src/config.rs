//! # Gateway Configuration
//!
//! Flag/env-minimal by design, the same way the teacher leans entirely on
//! `RUST_LOG` rather than a config file: every setting here has a sane
//! default and can be overridden by an environment variable.

use std::net::IpAddr;
use std::time::Duration;

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: std::net::SocketAddr,

    /// Interface new tunnel listeners bind to. Defaults to loopback.
    pub tunnel_bind_ip: IpAddr,

    /// TCP keepalive period applied to each accepted tunnel connection.
    pub accept_keepalive: Duration,

    /// Grace period given to in-flight sessions before a forced shutdown.
    pub shutdown_grace: Duration,

    /// Default `tracing_subscriber::EnvFilter` directive, overridable by
    /// the `RUST_LOG` environment variable.
    pub log_filter: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::net::SocketAddr::from(([0, 0, 0, 0], 7070)),
            tunnel_bind_ip: IpAddr::from([127, 0, 0, 1]),
            accept_keepalive: Duration::from_secs(20),
            shutdown_grace: Duration::from_secs(3),
            log_filter: "tunnel_gateway=info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = std::env::var("GATEWAY_BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.bind_addr);

        let tunnel_bind_ip = std::env::var("GATEWAY_TUNNEL_BIND_IP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.tunnel_bind_ip);

        let accept_keepalive = std::env::var("GATEWAY_ACCEPT_KEEPALIVE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.accept_keepalive);

        let shutdown_grace = std::env::var("GATEWAY_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        Self {
            bind_addr,
            tunnel_bind_ip,
            accept_keepalive,
            shutdown_grace,
            ..defaults
        }
    }
}
