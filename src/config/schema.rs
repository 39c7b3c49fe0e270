//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single upstream every request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// WebSocket relay settings.
    pub relay: RelayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Target URL (scheme, host and path prefix), e.g. "https://10.0.0.1:6443/api/".
    pub endpoint: String,

    /// Headers removed from every request before it reaches the upstream.
    /// Names are matched case-insensitively.
    pub header_blacklist: Vec<String>,

    /// `Origin` sent on backend WebSocket dials.
    pub origin: String,

    /// How often streamed response bodies are flushed to the client.
    /// Zero flushes every chunk as soon as it arrives.
    pub flush_interval_ms: u64,

    /// Client TLS settings used for https/wss upstreams.
    pub tls: ClientTlsConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/".to_string(),
            header_blacklist: Vec::new(),
            origin: "http://localhost".to_string(),
            flush_interval_ms: 500,
            tls: ClientTlsConfig::default(),
        }
    }
}

/// Client-side TLS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientTlsConfig {
    /// Extra PEM bundle of trusted CA certificates.
    pub ca_file: Option<String>,

    /// Skip certificate verification. Development only.
    pub insecure_skip_verify: bool,
}

/// Timeout configuration for upstream connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout in seconds.
    pub connect_secs: u64,

    /// TLS (and WebSocket) handshake timeout in seconds.
    pub tls_handshake_secs: u64,

    /// TCP keepalive interval for upstream connections in seconds.
    pub keepalive_secs: u64,

    /// How long shutdown waits for open relay sessions, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            tls_handshake_secs: 10,
            keepalive_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// WebSocket relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on sending a close frame during session teardown, in milliseconds.
    pub close_timeout_ms: u64,

    /// Relay ping/pong frames to the peer instead of letting each side answer locally.
    pub forward_pings: bool,

    /// Largest message or frame accepted on either side of a relay, in bytes.
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: 1000,
            forward_pings: false,
            max_message_bytes: 64 << 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}
