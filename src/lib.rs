//! WebSocket-aware reverse proxy library.
//!
//! Plain HTTP requests are forwarded to a single upstream endpoint; WebSocket
//! upgrades are dialed through to the backend and relayed frame by frame.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod websocket;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{Director, Proxy, ProxySettings};
