//! Host Gateway Bridge: the narrow interface this crate calls into the host
//! process through (§4.7, §6.1). Production code wires this to whatever IPC
//! the host gateway exposes; [`RecordingBridge`] in tests wires it to an
//! in-memory call log.

use serde_json::Value;

use super::media::MediaKind;

/// The six operations the host gateway exposes to this crate.
pub trait HostBridge: Send + Sync {
    /// Push an asynchronous event (a control-plane response or notification)
    /// back to the host, with an optional local JSEP to signal onward.
    fn push_event(&self, handle: u64, plugin: &str, transaction: &str, event: &Value, jsep: Option<&Value>);

    /// Hand a peer-sourced, already-rewritten RTP packet to the host's
    /// WebRTC stack for the given session and media kind.
    fn relay_rtp(&self, handle: u64, kind: MediaKind, buf: &[u8]);

    /// Hand a peer-sourced RTCP packet to the host's WebRTC stack.
    fn relay_rtcp(&self, handle: u64, kind: MediaKind, buf: &[u8]);

    /// Ask the host to tear down the WebRTC peer connection for this session.
    fn close_pc(&self, handle: u64);

    /// Fire a generic out-of-band notification (e.g. a PLI request, §4.4).
    fn notify_event(&self, plugin: &str, handle: u64, info: &Value);

    /// Whether `notify_event` calls should actually be emitted (§6.4 `events`).
    fn events_is_enabled(&self) -> bool;
}

/// One call recorded by [`RecordingBridge`], for test assertions.
#[derive(Debug, Clone)]
pub enum BridgeCall {
    PushEvent {
        handle: u64,
        transaction: String,
        event: Value,
        jsep: Option<Value>,
    },
    RelayRtp {
        handle: u64,
        kind: MediaKind,
        len: usize,
    },
    RelayRtcp {
        handle: u64,
        kind: MediaKind,
        len: usize,
    },
    ClosePc {
        handle: u64,
    },
    NotifyEvent {
        handle: u64,
        info: Value,
    },
}

/// In-memory [`HostBridge`] double used by the test harness (§4.7, §10.4).
#[derive(Default)]
pub struct RecordingBridge {
    calls: std::sync::Mutex<Vec<BridgeCall>>,
    events_enabled: std::sync::atomic::AtomicBool,
}

impl RecordingBridge {
    pub fn new() -> Self {
        RecordingBridge {
            calls: std::sync::Mutex::new(Vec::new()),
            events_enabled: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.calls.lock().expect("bridge call log mutex poisoned").clone()
    }

    pub fn set_events_enabled(&self, enabled: bool) {
        self.events_enabled.store(enabled, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clone for BridgeCall {
    fn clone(&self) -> Self {
        match self {
            BridgeCall::PushEvent { handle, transaction, event, jsep } => BridgeCall::PushEvent {
                handle: *handle,
                transaction: transaction.clone(),
                event: event.clone(),
                jsep: jsep.clone(),
            },
            BridgeCall::RelayRtp { handle, kind, len } => BridgeCall::RelayRtp { handle: *handle, kind: *kind, len: *len },
            BridgeCall::RelayRtcp { handle, kind, len } => BridgeCall::RelayRtcp { handle: *handle, kind: *kind, len: *len },
            BridgeCall::ClosePc { handle } => BridgeCall::ClosePc { handle: *handle },
            BridgeCall::NotifyEvent { handle, info } => BridgeCall::NotifyEvent { handle: *handle, info: info.clone() },
        }
    }
}

impl HostBridge for RecordingBridge {
    fn push_event(&self, handle: u64, _plugin: &str, transaction: &str, event: &Value, jsep: Option<&Value>) {
        self.calls.lock().unwrap().push(BridgeCall::PushEvent {
            handle,
            transaction: transaction.to_string(),
            event: event.clone(),
            jsep: jsep.cloned(),
        });
    }

    fn relay_rtp(&self, handle: u64, kind: MediaKind, buf: &[u8]) {
        self.calls.lock().unwrap().push(BridgeCall::RelayRtp { handle, kind, len: buf.len() });
    }

    fn relay_rtcp(&self, handle: u64, kind: MediaKind, buf: &[u8]) {
        self.calls.lock().unwrap().push(BridgeCall::RelayRtcp { handle, kind, len: buf.len() });
    }

    fn close_pc(&self, handle: u64) {
        self.calls.lock().unwrap().push(BridgeCall::ClosePc { handle });
    }

    fn notify_event(&self, _plugin: &str, handle: u64, info: &Value) {
        if !self.events_is_enabled() {
            return;
        }
        self.calls.lock().unwrap().push(BridgeCall::NotifyEvent { handle, info: info.clone() });
    }

    fn events_is_enabled(&self) -> bool {
        self.events_enabled.load(std::sync::atomic::Ordering::SeqCst)
    }
}
