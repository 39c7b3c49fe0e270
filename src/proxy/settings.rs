//! Resolved runtime settings for a proxy.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{HeaderValue, InvalidHeaderValue};

use crate::config::ProxyConfig;
use crate::net::{build_client_config, TlsError};
use crate::proxy::director::{Director, Endpoint, EndpointDirector, EndpointError, HeaderBlacklist};
use crate::websocket::RelayOptions;

/// Error type for settings resolution.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("client TLS: {0}")]
    Tls(#[from] TlsError),

    #[error("invalid origin header: {0}")]
    Origin(#[from] InvalidHeaderValue),
}

/// Everything a [`Proxy`](crate::proxy::Proxy) needs, built once at startup.
#[derive(Clone)]
pub struct ProxySettings {
    pub endpoint: Endpoint,
    pub header_blacklist: HeaderBlacklist,
    pub tls: Arc<rustls::ClientConfig>,
    /// Replaces the default endpoint director when set.
    pub director: Option<Arc<dyn Director>>,
    pub origin: HeaderValue,
    pub flush_interval: Duration,
    pub connect_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub keepalive: Duration,
    pub max_message_bytes: usize,
    pub relay: RelayOptions,
}

impl ProxySettings {
    /// Resolve a validated configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, SettingsError> {
        let upstream = &config.upstream;
        Ok(Self {
            endpoint: Endpoint::parse(&upstream.endpoint)?,
            header_blacklist: HeaderBlacklist::new(&upstream.header_blacklist)?,
            tls: build_client_config(&upstream.tls)?,
            director: None,
            origin: HeaderValue::from_str(&upstream.origin)?,
            flush_interval: Duration::from_millis(upstream.flush_interval_ms),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            tls_handshake_timeout: Duration::from_secs(config.timeouts.tls_handshake_secs),
            keepalive: Duration::from_secs(config.timeouts.keepalive_secs),
            max_message_bytes: config.relay.max_message_bytes,
            relay: RelayOptions {
                forward_pings: config.relay.forward_pings,
                close_timeout: Duration::from_millis(config.relay.close_timeout_ms),
            },
        })
    }

    /// Use `director` instead of the default endpoint rewrite.
    pub fn with_director(mut self, director: impl Director) -> Self {
        self.director = Some(Arc::new(director));
        self
    }

    /// The director requests go through: the override, or the endpoint default.
    pub fn resolve_director(&self) -> Arc<dyn Director> {
        match &self.director {
            Some(director) => Arc::clone(director),
            None => Arc::new(EndpointDirector::new(
                self.endpoint.clone(),
                self.header_blacklist.clone(),
            )),
        }
    }
}
