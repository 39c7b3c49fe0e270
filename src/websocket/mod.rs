//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Convert messages of either WebSocket library into typed frames (codec.rs)
//! - Establish the WebSocket connection to the backend (dial.rs)
//! - Bidirectional frame forwarding between client and backend (relay.rs)
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//!         axum::extract::ws            Frame            tokio-tungstenite
//! ```
//!
//! # Design Decisions
//! - Frame-level forwarding (no message rewriting)
//! - Text and binary frames keep their type end to end
//! - Close frames propagated; the first direction to stop ends the session
//! - Ping/pong answered locally by each side unless configured otherwise

pub mod codec;
pub mod dial;
pub mod relay;

pub use codec::{CodecError, Frame, FrameCodec, PayloadType};
pub use dial::{websocket_uri, BackendDialer, BackendStream, DialError};
pub use relay::{
    copy_frames, Direction, RelayError, RelayOptions, RelayOutcome, RelaySession, RelayStop,
};
