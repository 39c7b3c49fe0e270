//! Backend WebSocket dial.
//!
//! # Responsibilities
//! - Turn a directed http(s) URI into its ws(s) equivalent
//! - Connect through the upstream connector (TCP, then TLS for wss)
//! - Run the HTTP/1.1 upgrade within the handshake timeout
//! - Forward the client's (already filtered) headers plus a synthetic Origin
//!
//! The upgrade response is checked for status 101 and a matching
//! `Sec-WebSocket-Accept`. A backend may accept without choosing any of the
//! offered sub-protocols; whatever it answers is handed back unchanged.

use std::time::Duration;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::{PathAndQuery, Scheme, Uri};
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tower::ServiceExt;

use crate::proxy::forward::{ConnectTimeout, UpstreamConnector};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An established connection to the backend.
pub type BackendStream = WebSocketStream<TokioIo<Upgraded>>;

/// Headers the WebSocket client handshake generates itself, plus hop-by-hop headers.
const HANDSHAKE_HEADERS: [HeaderName; 12] = [
    header::HOST,
    header::UPGRADE,
    header::CONNECTION,
    header::ORIGIN,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::CONTENT_LENGTH,
];

/// Error type for backend dials.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("backend URI {0} has no host")]
    MissingHost(Uri),

    #[error("invalid backend URI: {0}")]
    InvalidUri(#[from] axum::http::Error),

    #[error("failed to build handshake request: {0}")]
    Request(#[source] axum::http::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: BoxError,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("handshake failed: {0}")]
    Handshake(#[from] hyper::Error),

    #[error("backend answered the upgrade with {0}")]
    Rejected(StatusCode),

    #[error("backend sent a wrong Sec-WebSocket-Accept")]
    BadAccept,

    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Rewrite an http(s) URI to ws(s): https becomes wss, anything else ws.
pub fn websocket_uri(uri: &Uri) -> Result<Uri, DialError> {
    let scheme = if uri.scheme() == Some(&Scheme::HTTPS) {
        "wss"
    } else {
        "ws"
    };
    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(scheme.parse().map_err(axum::http::Error::from)?);
    Ok(Uri::from_parts(parts).map_err(axum::http::Error::from)?)
}

/// The http(s) address the connector opens for a ws(s) target.
fn connect_uri(target: &Uri) -> Result<Uri, DialError> {
    let scheme = if target.scheme_str() == Some("wss") {
        Scheme::HTTPS
    } else {
        Scheme::HTTP
    };
    let authority = target
        .authority()
        .cloned()
        .ok_or_else(|| DialError::MissingHost(target.clone()))?;
    Ok(Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query("/")
        .build()?)
}

/// Dials the backend as a WebSocket client.
#[derive(Clone)]
pub struct BackendDialer {
    connector: UpstreamConnector,
    origin: HeaderValue,
    handshake_timeout: Duration,
    ws_config: WebSocketConfig,
}

impl BackendDialer {
    pub fn new(
        connector: UpstreamConnector,
        origin: HeaderValue,
        handshake_timeout: Duration,
        max_message_bytes: usize,
    ) -> Self {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_message_bytes);
        ws_config.max_frame_size = Some(max_message_bytes);
        Self {
            connector,
            origin,
            handshake_timeout,
            ws_config,
        }
    }

    /// Open a WebSocket connection to `target` (a ws:// or wss:// URI).
    ///
    /// Returns the stream and the sub-protocol the backend selected, if any.
    pub async fn dial(
        &self,
        target: &Uri,
        headers: &HeaderMap,
    ) -> Result<(BackendStream, Option<HeaderValue>), DialError> {
        let key = generate_key();
        let request = self.handshake_request(target, headers, &key)?;

        let addr = connect_uri(target)?;
        let io = self
            .connector
            .clone()
            .oneshot(addr.clone())
            .await
            .map_err(|source| {
                let addr = addr.authority().map(|a| a.to_string()).unwrap_or_default();
                if source.is::<ConnectTimeout>() {
                    DialError::ConnectTimeout(addr)
                } else {
                    DialError::Connect { addr, source }
                }
            })?;

        let upgrade = async {
            let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.with_upgrades().await {
                    tracing::debug!(error = %e, "Backend upgrade connection failed");
                }
            });

            let response = sender.send_request(request).await?;
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                return Err(DialError::Rejected(response.status()));
            }
            let accept = response.headers().get(header::SEC_WEBSOCKET_ACCEPT);
            if accept.map(HeaderValue::as_bytes) != Some(derive_accept_key(key.as_bytes()).as_bytes())
            {
                return Err(DialError::BadAccept);
            }
            let protocol = response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).cloned();
            let upgraded = hyper::upgrade::on(response).await?;
            Ok::<_, DialError>((upgraded, protocol))
        };
        let (upgraded, protocol) = tokio::time::timeout(self.handshake_timeout, upgrade)
            .await
            .map_err(|_| DialError::HandshakeTimeout)??;

        let backend = WebSocketStream::from_raw_socket(
            TokioIo::new(upgraded),
            Role::Client,
            Some(self.ws_config),
        )
        .await;

        tracing::debug!(backend = %target, protocol = ?protocol, "Backend WebSocket connected");
        Ok((backend, protocol))
    }

    fn handshake_request(
        &self,
        target: &Uri,
        headers: &HeaderMap,
        key: &str,
    ) -> Result<Request<Empty<Bytes>>, DialError> {
        let authority = target
            .authority()
            .ok_or_else(|| DialError::MissingHost(target.clone()))?;
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| DialError::Request(e.into()))?;
        let key = HeaderValue::from_str(key).map_err(|e| DialError::Request(e.into()))?;
        let path = target
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        let mut request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Empty::new())
            .map_err(DialError::Request)?;

        let out = request.headers_mut();
        for (name, value) in headers {
            if !HANDSHAKE_HEADERS.contains(name) {
                out.append(name.clone(), value.clone());
            }
        }
        out.insert(header::HOST, host);
        out.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        out.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        out.insert(header::SEC_WEBSOCKET_KEY, key);
        out.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        out.insert(header::ORIGIN, self.origin.clone());
        Ok(request)
    }
}
