//! Relay session identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique session IDs for tracing
//! - Count open relay sessions for metrics and shutdown draining
//! - Release the count on every exit path via a drop guard

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::observability::metrics;

/// Unique identifier for one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0.simple())
    }
}

/// Tracks open relay sessions so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
}

impl SessionTracker {
    /// Create a new session tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open session. The returned guard closes it on drop.
    pub fn track(&self) -> SessionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        metrics::ws_session_opened();
        SessionGuard {
            inner: Arc::clone(&self.inner),
            id: SessionId::new(),
        }
    }

    /// Current number of open sessions.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every session has closed, or until `grace` elapses.
    ///
    /// Returns `true` if all sessions closed in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that owns one session's slot in the tracker.
#[derive(Debug)]
pub struct SessionGuard {
    inner: Arc<TrackerInner>,
    id: SessionId,
}

impl SessionGuard {
    /// This session's ID.
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        metrics::ws_session_closed();
        tracing::trace!(session_id = %self.id, "Session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("ws-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_when_last_session_closes() {
        let tracker = SessionTracker::new();
        let guard = tracker.track();

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_idle_times_out() {
        let tracker = SessionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.wait_idle(Duration::from_millis(50)).await);
    }
}
