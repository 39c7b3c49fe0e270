//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream connection setup
//!     → tls.rs (client TLS configuration shared by HTTP and WebSocket dials)
//!
//! Upgraded connections
//!     → connection.rs (session IDs, open-session tracking for shutdown)
//! ```

pub mod connection;
pub mod tls;

pub use connection::{SessionGuard, SessionId, SessionTracker};
pub use tls::{build_client_config, TlsError};
