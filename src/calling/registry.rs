//! Session Registry & Reaper (§4.6).
//!
//! The registry holds the process-wide `handle -> Session` mapping. Destroyed
//! sessions move to a deferred list rather than being dropped immediately, so
//! any in-flight Dispatcher or Relay Loop work that already holds an `Arc`
//! keeps a valid session to act on; [`run`] is the background sweep that
//! frees them once their grace period elapses (§3 lifecycle, §8 property).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::session::{Session, SessionHandle};

/// How long a destroyed session stays in the deferred list before being
/// fully freed (§3, §8: freed in `[5s, 5.5s)`).
pub const RECLAIM_DELAY: Duration = Duration::from_secs(5);
/// Reaper tick interval (§4.6).
pub const REAPER_TICK: Duration = Duration::from_millis(500);

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionHandle, Arc<Session>>,
    deferred: Vec<Arc<Session>>,
}

/// Process-wide `handle -> Session` map plus the deferred-reclamation list,
/// both under one mutex (§5 shared-resource policy: "one mutex covers
/// membership and the deferred list").
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionRegistry {
            state: Mutex::new(RegistryState::default()),
        })
    }

    pub async fn insert(&self, session: Arc<Session>) {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.handle, session);
    }

    /// Look up a live session by handle. Never returns a destroyed session —
    /// those only live in the deferred list (§9: no raw pointers back out,
    /// callers always get an owned `Arc`).
    pub async fn get(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        let state = self.state.lock().await;
        state.sessions.get(&handle).cloned()
    }

    /// Move `handle` out of the live map into the deferred list, stamping
    /// `destroyed_at`. Returns `false` if the handle wasn't present (already
    /// destroyed, or never existed).
    pub async fn destroy(&self, handle: SessionHandle, now: Instant) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.remove(&handle) else {
            return false;
        };
        session.mark_destroyed(now);
        state.deferred.push(session);
        true
    }

    /// Reaper sweep: free every deferred session whose reclaim delay has
    /// elapsed. Returns how many were freed.
    pub async fn reap(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let before = state.deferred.len();
        state.deferred.retain(|session| match session.destroyed_at() {
            Some(at) => now.duration_since(at) < RECLAIM_DELAY,
            None => true,
        });
        before - state.deferred.len()
    }

    pub async fn live_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn deferred_count(&self) -> usize {
        self.state.lock().await.deferred.len()
    }
}

/// Runs until `stopping` is set, sweeping the deferred list every
/// [`REAPER_TICK`] (§4.6, §5).
pub async fn run(registry: Arc<SessionRegistry>, stopping: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(REAPER_TICK);
    loop {
        interval.tick().await;
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let reclaimed = registry.reap(Instant::now()).await;
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "reaper freed destroyed sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn destroy_moves_session_to_deferred_list() {
        let registry = SessionRegistry::new();
        let session = Session::new(1);
        registry.insert(session.clone()).await;

        assert!(registry.destroy(1, Instant::now()).await);
        assert!(registry.get(1).await.is_none());
        assert_eq!(registry.deferred_count().await, 1);
    }

    #[tokio::test]
    async fn reap_respects_reclaim_delay() {
        let registry = SessionRegistry::new();
        let session = Session::new(1);
        registry.insert(session).await;
        let t0 = Instant::now();
        registry.destroy(1, t0).await;

        assert_eq!(registry.reap(t0 + Duration::from_millis(4900)).await, 0);
        assert_eq!(registry.reap(t0 + Duration::from_millis(5100)).await, 1);
        assert_eq!(registry.deferred_count().await, 0);
    }

    #[tokio::test]
    async fn destroying_unknown_handle_is_a_no_op() {
        let registry = SessionRegistry::new();
        assert!(!registry.destroy(42, Instant::now()).await);
    }

    #[tokio::test]
    async fn live_and_deferred_counts_track_membership() {
        let registry = SessionRegistry::new();
        registry.insert(Session::new(1)).await;
        registry.insert(Session::new(2)).await;
        assert_eq!(registry.live_count().await, 2);

        registry.destroy(1, Instant::now()).await;
        assert_eq!(registry.live_count().await, 1);
        assert_eq!(registry.deferred_count().await, 1);
    }
}
