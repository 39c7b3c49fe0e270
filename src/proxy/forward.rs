//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Run the Director on every request
//! - Remove hop-by-hop headers in both directions
//! - Record the client address in `X-Forwarded-For`
//! - Stream the upstream response back through [`FlushBody`]
//! - Map upstream failures to 502

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::Service;

use crate::observability::metrics;
use crate::proxy::director::Director;
use crate::proxy::flush::FlushBody;
use crate::proxy::settings::ProxySettings;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connector used by the upstream client: TCP, then optional TLS, under one deadline.
pub type UpstreamConnector = TimeoutConnector<HttpsConnector<HttpConnector>>;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Error returned when connecting to the upstream exceeds its deadline.
#[derive(Debug, thiserror::Error)]
#[error("upstream connect timed out after {0:?}")]
pub struct ConnectTimeout(Duration);

/// Wraps a connector so the whole connect (TCP and TLS) is bounded.
#[derive(Debug, Clone)]
pub struct TimeoutConnector<C> {
    inner: C,
    timeout: Duration,
}

impl<C> TimeoutConnector<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<C> Service<Uri> for TimeoutConnector<C>
where
    C: Service<Uri>,
    C::Error: Into<BoxError>,
    C::Future: Send + 'static,
    C::Response: Send + 'static,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<C::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let timeout = self.timeout;
        let connecting = self.inner.call(uri);
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(Box::new(ConnectTimeout(timeout)) as BoxError),
            }
        })
    }
}

/// TCP then optional TLS toward the upstream, as configured by `settings`.
///
/// TCP connect is bounded by the connect timeout, the whole connect including
/// TLS by connect plus TLS handshake timeout.
pub fn upstream_connector(settings: &ProxySettings) -> UpstreamConnector {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(settings.connect_timeout));
    http.set_keepalive(Some(settings.keepalive));

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(settings.tls.as_ref().clone())
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);
    TimeoutConnector::new(https, settings.connect_timeout + settings.tls_handshake_timeout)
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append `ip` to `X-Forwarded-For`, merging any earlier values into one list.
pub fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {ip}", prior.join(", "))
    };
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
        Err(e) => tracing::debug!(error = %e, "Skipping malformed X-Forwarded-For"),
    }
}

fn wants_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("trailers"))
}

/// Forwards non-upgrade requests to the upstream with a pooled client.
#[derive(Clone)]
pub struct PlainProxy {
    client: Client<UpstreamConnector, Body>,
    director: Arc<dyn Director>,
    flush_interval: Duration,
}

impl PlainProxy {
    pub fn new(settings: &ProxySettings, director: Arc<dyn Director>) -> Self {
        let connector = upstream_connector(settings);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(settings.keepalive)
            .build(connector);

        Self {
            client,
            director,
            flush_interval: settings.flush_interval,
        }
    }

    /// Direct `request` to the upstream and stream back its response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let (mut parts, body) = request.into_parts();

        self.director.direct(&mut parts);
        let keep_te = wants_trailers(&parts.headers);
        remove_hop_headers(&mut parts.headers);
        if keep_te {
            parts.headers.insert(header::TE, HeaderValue::from_static("trailers"));
        }
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut parts.headers, addr.ip());
        }
        // The upstream connection is always HTTP/1.1 regardless of the inbound version.
        parts.version = Version::HTTP_11;

        let target = parts.uri.clone();
        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                remove_hop_headers(&mut parts.headers);
                metrics::record_request("plain", parts.status.as_u16());
                tracing::debug!(upstream = %target, status = %parts.status, "Upstream responded");
                Response::from_parts(parts, Body::new(FlushBody::new(body, self.flush_interval)))
            }
            Err(e) => {
                tracing::error!(upstream = %target, error = %e, "Upstream request failed");
                metrics::record_upstream_error();
                metrics::record_request("plain", StatusCode::BAD_GATEWAY.as_u16());
                (StatusCode::BAD_GATEWAY, "bad gateway").into_response()
            }
        }
    }
}
