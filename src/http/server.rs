//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with a catch-all proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Serve on a bound listener until shutdown
//! - Drain open relay sessions before returning

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::lifecycle::shutdown;
use crate::proxy::Proxy;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Proxy,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    proxy: Proxy,
    shutdown_grace: Duration,
}

impl HttpServer {
    /// Create a server that hands every request to `proxy`.
    pub fn new(proxy: Proxy, shutdown_grace: Duration) -> Self {
        let state = AppState {
            proxy: proxy.clone(),
        };
        Self {
            router: Self::build_router(state),
            proxy,
            shutdown_grace,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown_rx` fires, then wait for relay sessions.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown_rx))
            .await?;

        // Upgraded connections outlive the server; give their relays time to finish.
        let sessions = self.proxy.sessions();
        if sessions.active_count() > 0 {
            tracing::info!(
                active = sessions.active_count(),
                grace_secs = self.shutdown_grace.as_secs(),
                "Draining relay sessions"
            );
            if !sessions.wait_idle(self.shutdown_grace).await {
                tracing::warn!(
                    remaining = sessions.active_count(),
                    "Grace period elapsed with relay sessions still open"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    tracing::debug!(
        method = %request.method(),
        path = %request.uri().path(),
        client = ?client_addr,
        "Proxying request"
    );

    state.proxy.handle(request, client_addr).await
}
