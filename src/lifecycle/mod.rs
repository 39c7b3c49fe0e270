//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain relay sessions → Exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has a grace period: sessions still open afterwards are dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
