//! Request dispatch: plain HTTP forwarding or WebSocket relay.
//!
//! # Data Flow
//! ```text
//! request ──is_upgrade_request?──no──▶ PlainProxy (director, hyper client, FlushBody)
//!                 │
//!                yes
//!                 ▼
//!     validate client handshake → director → ws(s) URI → dial backend
//!                 │                                          │
//!                 │                                     failure → 502
//!                 ▼
//!     101 Switching Protocols → RelaySession (until the first direction stops)
//! ```

pub mod director;
pub mod flush;
pub mod forward;
pub mod settings;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::http::header::{HeaderMap, UPGRADE};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::net::SessionTracker;
use crate::observability::metrics;
use crate::websocket::{websocket_uri, BackendDialer, RelayOptions, RelaySession};

pub use director::{single_joining_slash, Director, Endpoint, EndpointDirector, HeaderBlacklist};
pub use flush::FlushBody;
pub use forward::PlainProxy;
pub use settings::{ProxySettings, SettingsError};

/// True when any `Upgrade` header value is "websocket", ignoring case.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get_all(UPGRADE)
        .iter()
        .any(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

/// The proxy for one listening endpoint. Cheap to clone; immutable once built.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    director: Arc<dyn Director>,
    plain: PlainProxy,
    dialer: BackendDialer,
    relay: RelayOptions,
    max_message_bytes: usize,
    sessions: SessionTracker,
}

impl Proxy {
    /// Bind settings to a plain-HTTP delegate and a backend dialer.
    pub fn new(settings: ProxySettings) -> Self {
        let director = settings.resolve_director();
        let plain = PlainProxy::new(&settings, Arc::clone(&director));
        let dialer = BackendDialer::new(
            forward::upstream_connector(&settings),
            settings.origin.clone(),
            settings.tls_handshake_timeout,
            settings.max_message_bytes,
        );

        Self {
            inner: Arc::new(ProxyInner {
                director,
                plain,
                dialer,
                relay: settings.relay,
                max_message_bytes: settings.max_message_bytes,
                sessions: SessionTracker::new(),
            }),
        }
    }

    /// Open relay sessions.
    pub fn sessions(&self) -> &SessionTracker {
        &self.inner.sessions
    }

    /// Serve one inbound request.
    pub async fn handle(
        &self,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response {
        if is_upgrade_request(request.headers()) {
            self.upgrade(request).await
        } else {
            self.inner.plain.forward(request, client_addr).await
        }
    }

    async fn upgrade(&self, request: Request<Body>) -> Response {
        let (mut parts, _body) = request.into_parts();

        let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => ws,
            Err(rejection) => {
                tracing::debug!(error = %rejection, "Rejected client WebSocket handshake");
                metrics::record_request("upgrade", rejection.status().as_u16());
                return rejection.into_response();
            }
        };

        self.inner.director.direct(&mut parts);
        let target = match websocket_uri(&parts.uri) {
            Ok(target) => target,
            Err(e) => return bad_gateway(&e),
        };

        let (backend, protocol) = match self.inner.dialer.dial(&target, &parts.headers).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::warn!(backend = %target, error = %e, "Backend WebSocket dial failed");
                metrics::record_dial_failure();
                return bad_gateway(&e);
            }
        };

        let mut ws = ws
            .max_message_size(self.inner.max_message_bytes)
            .max_frame_size(self.inner.max_message_bytes);
        if let Some(protocol) = protocol.as_ref().and_then(|p| p.to_str().ok()) {
            ws = ws.protocols([protocol.to_owned()]);
        }

        let relay = self.inner.relay;
        let sessions = self.inner.sessions.clone();
        ws.on_failed_upgrade(|e: axum::Error| {
            tracing::warn!(error = %e, "Client WebSocket upgrade failed");
        })
        .on_upgrade(move |frontend| async move {
            metrics::record_request("upgrade", StatusCode::SWITCHING_PROTOCOLS.as_u16());
            let guard = sessions.track();
            tracing::info!(session_id = %guard.id(), backend = %target, "Relay session opened");
            RelaySession::new(frontend, backend, relay, guard).run().await;
        })
    }
}

fn bad_gateway(error: &dyn std::error::Error) -> Response {
    tracing::debug!(error = %error, "Answering bad gateway");
    metrics::record_request("upgrade", StatusCode::BAD_GATEWAY.as_u16());
    (StatusCode::BAD_GATEWAY, "bad gateway").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(UPGRADE, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn websocket_upgrade_in_any_case() {
        for value in ["websocket", "WebSocket", "WEBSOCKET", "wEbSoCkEt"] {
            assert!(is_upgrade_request(&headers(&[value])), "{value}");
        }
    }

    #[test]
    fn other_upgrades_and_absence_are_plain() {
        assert!(!is_upgrade_request(&headers(&[])));
        assert!(!is_upgrade_request(&headers(&["h2c"])));
        assert!(!is_upgrade_request(&headers(&["websocket2"])));
        assert!(!is_upgrade_request(&headers(&[""])));
    }

    #[test]
    fn any_of_several_values_counts() {
        assert!(is_upgrade_request(&headers(&["h2c", "websocket"])));
    }

    #[tokio::test]
    async fn malformed_handshake_is_rejected_without_dialing() {
        // Nothing listens on the endpoint, so a dial would turn into a 502.
        let mut config = crate::config::ProxyConfig::default();
        config.upstream.endpoint = "http://127.0.0.1:9/".into();
        let proxy = Proxy::new(ProxySettings::from_config(&config).unwrap());

        let request = Request::builder()
            .uri("/socket")
            .header("upgrade", "websocket")
            .header("connection", "upgrade")
            .body(Body::empty())
            .unwrap();
        let response = proxy.handle(request, None).await;

        assert!(response.status().is_client_error(), "got {}", response.status());
        assert_eq!(proxy.sessions().active_count(), 0);
    }
}
