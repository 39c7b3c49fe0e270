//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → proxy::Proxy (plain forward or WebSocket relay)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
