//! Bidirectional frame relay between two WebSocket connections.
//!
//! # Data Flow
//! ```text
//! frontend stream ──copy_frames(Upstream)──▶ backend sink
//! frontend sink  ◀──copy_frames(Downstream)── backend stream
//!                         │
//!                         ▼
//!             mpsc(2): first result wins → teardown
//! ```
//!
//! A session ends as soon as either direction stops. Peers are not trusted to
//! finish the close handshake, so the session never waits for the second
//! direction: its task is aborted, which drops its halves of both connections.

use std::fmt;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::net::SessionGuard;
use crate::observability::metrics;
use crate::websocket::codec::{CodecError, FrameCodec, PayloadType};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which way frames travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend.
    Upstream,
    /// Backend to client.
    Downstream,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a copy loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStop {
    /// A close frame was received (and passed on to the peer).
    Closed { code: Option<u16> },
    /// The source stream ended without a close frame.
    Eof,
}

/// Error type for a copy loop.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("receive failed: {0}")]
    Receive(#[source] BoxError),

    #[error("send failed: {0}")]
    Send(#[source] BoxError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Tuning knobs for a relay session.
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Pass ping/pong frames through instead of dropping them.
    pub forward_pings: bool,
    /// Upper bound on closing the destination sink when a direction stops.
    pub close_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            forward_pings: false,
            close_timeout: Duration::from_secs(1),
        }
    }
}

/// Copy frames from `src` to `dest` until one of them fails or a close frame arrives.
///
/// Frames keep their type. Ping and pong frames are answered by each side's
/// WebSocket implementation and are dropped unless `forward_pings` is set.
/// A close frame is forwarded before the loop returns.
pub async fn copy_frames<S, D, In, Out, SE, DE>(
    mut src: S,
    mut dest: D,
    direction: Direction,
    forward_pings: bool,
) -> Result<RelayStop, RelayError>
where
    S: Stream<Item = Result<In, SE>> + Unpin,
    D: Sink<Out, Error = DE> + Unpin,
    In: FrameCodec,
    Out: FrameCodec,
    SE: std::error::Error + Send + Sync + 'static,
    DE: std::error::Error + Send + Sync + 'static,
{
    loop {
        let message = match src.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(RelayError::Receive(Box::new(e))),
            None => return Ok(RelayStop::Eof),
        };

        let frame = message.decode()?;
        let payload_type = frame.payload_type();
        if matches!(payload_type, PayloadType::Ping | PayloadType::Pong) && !forward_pings {
            continue;
        }

        let close_code = frame.close_code();
        dest.send(Out::encode(frame)?)
            .await
            .map_err(|e| RelayError::Send(Box::new(e)))?;
        metrics::record_frame(direction.as_str(), payload_type.as_str());

        if payload_type == PayloadType::Close {
            return Ok(RelayStop::Closed { code: close_code });
        }
    }
}

/// How a session ended: the first direction to stop, and why.
#[derive(Debug)]
pub struct RelayOutcome {
    pub direction: Direction,
    pub result: Result<RelayStop, RelayError>,
}

/// The frontend/backend connection pair of one upgraded client.
pub struct RelaySession<F, B> {
    frontend: F,
    backend: B,
    options: RelayOptions,
    guard: SessionGuard,
}

impl<F, B, FM, BM, FE, BE> RelaySession<F, B>
where
    F: Stream<Item = Result<FM, FE>> + Sink<FM, Error = FE> + Send + Unpin + 'static,
    B: Stream<Item = Result<BM, BE>> + Sink<BM, Error = BE> + Send + Unpin + 'static,
    FM: FrameCodec + Send + 'static,
    BM: FrameCodec + Send + 'static,
    FE: std::error::Error + Send + Sync + 'static,
    BE: std::error::Error + Send + Sync + 'static,
{
    pub fn new(frontend: F, backend: B, options: RelayOptions, guard: SessionGuard) -> Self {
        Self {
            frontend,
            backend,
            options,
            guard,
        }
    }

    /// Relay frames in both directions until the first direction stops, then
    /// close both connections.
    pub async fn run(self) -> RelayOutcome {
        let session_id = self.guard.id();
        let (frontend_sink, frontend_stream) = self.frontend.split();
        let (backend_sink, backend_stream) = self.backend.split();

        let (done_tx, mut done_rx) = mpsc::channel(2);
        let upstream = spawn_direction(
            Direction::Upstream,
            frontend_stream,
            backend_sink,
            self.options,
            done_tx.clone(),
        );
        let downstream = spawn_direction(
            Direction::Downstream,
            backend_stream,
            frontend_sink,
            self.options,
            done_tx,
        );

        tracing::debug!(session_id = %session_id, "Relay started");

        let outcome = match done_rx.recv().await {
            Some(outcome) => outcome,
            // Both senders dropped without reporting: the copy tasks panicked.
            None => RelayOutcome {
                direction: Direction::Upstream,
                result: Err(RelayError::Receive("relay task exited without a result".into())),
            },
        };

        upstream.abort();
        downstream.abort();

        match &outcome.result {
            Ok(stop) => tracing::info!(
                session_id = %session_id,
                direction = %outcome.direction,
                stop = ?stop,
                "Relay session ended"
            ),
            Err(e) => tracing::warn!(
                session_id = %session_id,
                direction = %outcome.direction,
                error = %e,
                "Relay session failed"
            ),
        }

        outcome
    }
}

fn spawn_direction<S, D, In, Out, SE, DE>(
    direction: Direction,
    src: S,
    mut dest: D,
    options: RelayOptions,
    done: mpsc::Sender<RelayOutcome>,
) -> JoinHandle<()>
where
    S: Stream<Item = Result<In, SE>> + Send + Unpin + 'static,
    D: Sink<Out, Error = DE> + Send + Unpin + 'static,
    In: FrameCodec + Send + 'static,
    Out: FrameCodec + Send + 'static,
    SE: std::error::Error + Send + Sync + 'static,
    DE: std::error::Error + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let result = copy_frames(src, &mut dest, direction, options.forward_pings).await;
        if tokio::time::timeout(options.close_timeout, dest.close()).await.is_err() {
            tracing::debug!(direction = %direction, "Close of peer timed out");
        }
        let _ = done.send(RelayOutcome { direction, result }).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SessionTracker;
    use futures_util::stream;
    use tokio::io::{duplex, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn copy_preserves_types_and_order() {
        let src = stream::iter(vec![
            Ok::<_, std::io::Error>(Message::text("one")),
            Ok(Message::binary(vec![0u8, 1, 2])),
            Ok(Message::Ping(vec![9u8].into())),
            Ok(Message::text("two")),
        ]);
        let mut out: Vec<Message> = Vec::new();
        let stop = copy_frames(src, &mut out, Direction::Upstream, false)
            .await
            .unwrap();
        assert_eq!(stop, RelayStop::Eof);

        assert_eq!(
            out,
            vec![
                Message::text("one"),
                Message::binary(vec![0u8, 1, 2]),
                Message::text("two"),
            ]
        );
    }

    #[tokio::test]
    async fn pings_forwarded_when_enabled() {
        let src = stream::iter(vec![Ok::<_, std::io::Error>(Message::Ping(vec![7u8].into()))]);
        let mut out: Vec<Message> = Vec::new();
        copy_frames(src, &mut out, Direction::Downstream, true)
            .await
            .unwrap();
        assert_eq!(out, vec![Message::Ping(vec![7u8].into())]);
    }

    #[tokio::test]
    async fn close_is_forwarded_and_stops_the_loop() {
        let src = stream::iter(vec![
            Ok::<_, std::io::Error>(Message::Close(None)),
            Ok(Message::text("never")),
        ]);
        let mut out: Vec<Message> = Vec::new();
        let stop = copy_frames(src, &mut out, Direction::Upstream, false)
            .await
            .unwrap();
        assert_eq!(stop, RelayStop::Closed { code: None });
        assert_eq!(out, vec![Message::Close(None)]);
    }

    #[tokio::test]
    async fn receive_error_ends_the_loop() {
        let src = stream::iter(vec![
            Ok(Message::text("first")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut out: Vec<Message> = Vec::new();
        let err = copy_frames(src, &mut out, Direction::Upstream, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Receive(_)));
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn session_relays_both_directions() {
        let (frontend, mut client) = ws_pair().await;
        let (mut backend_server, backend) = ws_pair().await;
        let tracker = SessionTracker::new();

        let session = RelaySession::new(frontend, backend, RelayOptions::default(), tracker.track());
        let handle = tokio::spawn(session.run());

        client.send(Message::text("hi backend")).await.unwrap();
        let got = backend_server.next().await.unwrap().unwrap();
        assert_eq!(got, Message::text("hi backend"));

        backend_server
            .send(Message::binary(b"hi client".to_vec()))
            .await
            .unwrap();
        let got = client.next().await.unwrap().unwrap();
        assert_eq!(got, Message::binary(b"hi client".to_vec()));

        client.close(None).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.direction, Direction::Upstream);
        assert!(matches!(outcome.result, Ok(RelayStop::Closed { .. })));
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn vanished_backend_ends_session_and_closes_client() {
        let (frontend, mut client) = ws_pair().await;
        let (backend_server, backend) = ws_pair().await;
        let tracker = SessionTracker::new();

        let session = RelaySession::new(frontend, backend, RelayOptions::default(), tracker.track());
        let handle = tokio::spawn(session.run());

        // The backend goes away without a close handshake.
        drop(backend_server);

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session must end when the backend goes away")
            .unwrap();
        assert_eq!(outcome.direction, Direction::Downstream);
        assert!(!matches!(outcome.result, Ok(RelayStop::Closed { .. })));

        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(ended.is_ok(), "client socket stayed open");
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn silent_backend_does_not_block_teardown() {
        let (frontend, client) = ws_pair().await;
        let (mut backend_server, backend) = ws_pair().await;
        let tracker = SessionTracker::new();

        let session = RelaySession::new(frontend, backend, RelayOptions::default(), tracker.track());
        let handle = tokio::spawn(session.run());

        // Vanish without a close frame; the backend never says anything.
        drop(client);

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session must end without the backend's cooperation")
            .unwrap();
        assert_eq!(outcome.direction, Direction::Upstream);

        // The backend side observes its connection going away.
        let next = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match backend_server.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(next.is_ok());
        assert_eq!(tracker.active_count(), 0);
    }
}
