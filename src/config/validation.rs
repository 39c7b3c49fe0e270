//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Upstream endpoint must be an absolute http/https URL with a host
//! - Header blacklist entries must be valid header names
//! - Timeouts must be non-zero, addresses must parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("upstream.endpoint {0:?} is not a valid URL")]
    EndpointUrl(String),

    #[error("upstream.endpoint scheme {0:?} must be http or https")]
    EndpointScheme(String),

    #[error("upstream.endpoint {0:?} has no host")]
    EndpointHost(String),

    #[error("upstream.header_blacklist entry {0:?} is not a valid header name")]
    HeaderName(String),

    #[error("upstream.origin must not be empty")]
    EmptyOrigin,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let endpoint = &config.upstream.endpoint;
    match Url::parse(endpoint) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                errors.push(ValidationError::EndpointScheme(url.scheme().to_string()));
            }
            if url.host_str().map_or(true, str::is_empty) {
                errors.push(ValidationError::EndpointHost(endpoint.clone()));
            }
        }
        Err(_) => errors.push(ValidationError::EndpointUrl(endpoint.clone())),
    }

    for name in &config.upstream.header_blacklist {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::HeaderName(name.clone()));
        }
    }

    if config.upstream.origin.trim().is_empty() {
        errors.push(ValidationError::EmptyOrigin);
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.tls_handshake_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("tls_handshake_secs"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
