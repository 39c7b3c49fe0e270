//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Request, Uri};
use axum::routing::{any, get};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as WsRequest, Response as WsResponse,
};
use tokio_tungstenite::tungstenite::Message;

use ws_bridge_proxy::config::ProxyConfig;
use ws_bridge_proxy::{HttpServer, Proxy, ProxySettings, Shutdown};

/// Sub-protocol the WebSocket backend agrees to when offered.
pub const BACKEND_PROTOCOL: &str = "chat.v1";

/// A port with no listener behind it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Start an HTTP backend that describes each request in its response body.
///
/// The body is the request line (`METHOD path?query`), one `name: value` line
/// per header, a blank line, then the request body. `/stream` instead answers
/// with two chunks 300 ms apart.
pub async fn start_http_backend() -> SocketAddr {
    let app = Router::new()
        .route("/stream", get(stream_handler))
        .route("/{*path}", any(echo_handler))
        .route("/", any(echo_handler));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo_handler(request: Request<Body>) -> String {
    let (parts, body) = request.into_parts();
    let mut out = format!("{} {}\n", parts.method, parts.uri);
    for (name, value) in &parts.headers {
        out.push_str(&format!("{}: {}\n", name, value.to_str().unwrap_or("<binary>")));
    }
    out.push('\n');
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    out.push_str(&String::from_utf8_lossy(&body));
    out
}

async fn stream_handler() -> Body {
    let chunks = futures_util::stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok::<_, Infallible>(Bytes::from_static(b"one")), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Some((Ok(Bytes::from_static(b"two")), 2))
            }
            _ => None,
        }
    });
    Body::from_stream(chunks)
}

/// What the WebSocket backend saw during one client handshake.
#[derive(Debug)]
pub struct Handshake {
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Handle on a running WebSocket backend.
pub struct WsBackend {
    pub addr: SocketAddr,
    /// One entry per accepted handshake.
    pub handshakes: mpsc::UnboundedReceiver<Handshake>,
    /// One entry each time a backend connection finishes.
    pub closed: mpsc::UnboundedReceiver<()>,
}

/// Start a WebSocket backend. Echoes text and binary frames when `echo` is
/// set; otherwise it never reads from its connections.
pub async fn start_ws_backend(echo: bool) -> WsBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshakes) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handshake_tx = handshake_tx.clone();
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let callback = move |request: &WsRequest, mut response: WsResponse| {
                    let offered = request
                        .headers()
                        .get_all("sec-websocket-protocol")
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .flat_map(|v| v.split(','))
                        .any(|p| p.trim() == BACKEND_PROTOCOL);
                    if offered {
                        response.headers_mut().insert(
                            "sec-websocket-protocol",
                            HeaderValue::from_static(BACKEND_PROTOCOL),
                        );
                    }
                    let _ = handshake_tx.send(Handshake {
                        uri: request.uri().clone(),
                        headers: request.headers().clone(),
                    });
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };

                if echo {
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(_) | Message::Binary(_) => {
                                if ws.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                    let _ = ws.close(None).await;
                    let _ = closed_tx.send(());
                } else {
                    // Hold the connection open without ever reading.
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(ws);
                }
            });
        }
    });

    WsBackend {
        addr,
        handshakes,
        closed,
    }
}

/// Start a WebSocket backend that drops each connection, without a close
/// handshake, as soon as the first message arrives.
pub async fn start_vanishing_ws_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let _ = ws.next().await;
                drop(ws);
            });
        }
    });
    addr
}

/// A proxy serving on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub proxy: Proxy,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Wait until no relay session is open; false if that took longer than `within`.
    pub async fn wait_sessions_closed(&self, within: Duration) -> bool {
        self.proxy.sessions().wait_idle(within).await
    }
}

/// Start a proxy toward `endpoint`, letting the caller adjust the config first.
pub async fn start_proxy(endpoint: &str, customize: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.upstream.endpoint = endpoint.to_string();
    config.upstream.flush_interval_ms = 50;
    config.timeouts.connect_secs = 2;
    config.timeouts.tls_handshake_secs = 2;
    config.relay.close_timeout_ms = 200;
    customize(&mut config);

    let proxy = Proxy::new(ProxySettings::from_config(&config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(proxy.clone(), Duration::from_secs(1));
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, shutdown_rx).await.unwrap();
    });

    TestProxy {
        addr,
        proxy,
        shutdown,
    }
}
