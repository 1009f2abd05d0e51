//! Per-dialog session state (§3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::media::MediaDescriptor;
use super::recording::RecorderSet;
use super::sdp::SdpDocument;

/// Opaque handle type the host uses to name a session (§6.1).
pub type SessionHandle = u64;

/// One active (or recently-destroyed, awaiting reclamation) dialog.
pub struct Session {
    pub handle: SessionHandle,
    pub media: AsyncMutex<MediaDescriptor>,
    pub last_sdp: AsyncMutex<Option<SdpDocument>>,
    pub recorders: AsyncMutex<RecorderSet>,
    hanging_up: AtomicBool,
    destroyed_at: std::sync::Mutex<Option<Instant>>,
    relay_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(handle: SessionHandle) -> Arc<Self> {
        Arc::new(Session {
            handle,
            media: AsyncMutex::new(MediaDescriptor::new()),
            last_sdp: AsyncMutex::new(None),
            recorders: AsyncMutex::new(RecorderSet::default()),
            hanging_up: AtomicBool::new(false),
            destroyed_at: std::sync::Mutex::new(None),
            relay_task: std::sync::Mutex::new(None),
        })
    }

    /// Idempotent hangup latch: returns `true` only for the caller that wins
    /// the compare-and-set, so hangup teardown runs at most once (§8).
    pub fn try_start_hangup(&self) -> bool {
        self.hanging_up
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Set the latch without caring who "wins" — used by transport-error
    /// paths that just need to stop relaying, not to run teardown exactly once.
    pub fn mark_hanging_up(&self) {
        self.hanging_up.store(true, Ordering::SeqCst);
    }

    pub fn is_hanging_up(&self) -> bool {
        self.hanging_up.load(Ordering::SeqCst)
    }

    pub fn mark_destroyed(&self, at: Instant) {
        *self.destroyed_at.lock().expect("destroyed_at mutex poisoned") = Some(at);
    }

    pub fn destroyed_at(&self) -> Option<Instant> {
        *self.destroyed_at.lock().expect("destroyed_at mutex poisoned")
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed_at().is_some()
    }

    /// Record the Relay Loop's task handle, aborting and replacing any
    /// previous one (re-answering an already-active session).
    pub fn set_relay_task(&self, handle: JoinHandle<()>) {
        let mut slot = self.relay_task.lock().expect("relay_task mutex poisoned");
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    pub fn has_relay_task(&self) -> bool {
        self.relay_task
            .lock()
            .expect("relay_task mutex poisoned")
            .is_some()
    }

    pub fn abort_relay_task(&self) {
        if let Some(handle) = self.relay_task.lock().expect("relay_task mutex poisoned").take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangup_latch_wins_exactly_once() {
        let session = Session::new(1);
        assert!(session.try_start_hangup());
        assert!(!session.try_start_hangup());
    }

    #[test]
    fn destroyed_reflects_mark_destroyed() {
        let session = Session::new(1);
        assert!(!session.is_destroyed());
        session.mark_destroyed(Instant::now());
        assert!(session.is_destroyed());
    }
}
