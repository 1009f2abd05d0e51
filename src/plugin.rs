//! Host-facing plugin API (§4.7, §6.1, §9).
//!
//! [`Plugin`] is the narrow surface a host gateway drives this crate through.
//! It owns the session registry, the reaper background task and the
//! control-plane dispatcher, and is generic over the [`HostBridge`]
//! implementation so the gateway integration stays out of this crate.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::calling::dispatcher::{self, DispatchRequest, DispatchSender};
use crate::calling::host::HostBridge;
use crate::calling::media::MediaKind;
use crate::calling::registry::{self, SessionRegistry};
use crate::calling::relay;
use crate::calling::session::{Session, SessionHandle};
use crate::config::Config;
use crate::error::NoSipError;

pub const PLUGIN_NAME: &str = "janus.plugin.nosip";
pub const PLUGIN_VERSION: u32 = 1;
pub const PLUGIN_VERSION_STRING: &str = "0.1.0";
pub const PLUGIN_DESCRIPTION: &str =
    "Signalling-agnostic WebRTC-to-RTP/SDES-SRTP media bridge, not tied to any SIP stack";
pub const PLUGIN_AUTHOR: &str = "nosip-bridge";

/// The media bridge's host-facing entrypoint, parameterised by the gateway's
/// own [`HostBridge`] implementation.
pub struct Plugin<B: HostBridge + 'static> {
    config: Arc<Config>,
    bridge: Arc<B>,
    registry: Arc<SessionRegistry>,
    dispatch_tx: DispatchSender,
    stopping: Arc<AtomicBool>,
    dispatcher_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    reaper_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<B: HostBridge + 'static> Plugin<B> {
    /// Load configuration from `config_dir`, then spawn the Dispatcher and
    /// Reaper background tasks (§4.4, §4.6).
    pub async fn init(bridge: Arc<B>, config_dir: &Path) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(Config::load(config_dir)?);
        let registry = SessionRegistry::new();
        let (dispatch_tx, dispatch_rx) = dispatcher::channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let dispatcher_task = tokio::spawn(dispatcher::run(
            dispatch_rx,
            registry.clone(),
            config.clone(),
            bridge.clone(),
        ));
        let reaper_task = tokio::spawn(registry::run(registry.clone(), stopping.clone()));

        tracing::info!(
            local_ip = %config.local_ip,
            rtp_range = format!("{}-{}", config.rtp_range_min, config.rtp_range_max),
            "nosip-bridge initialised"
        );

        Ok(Arc::new(Plugin {
            config,
            bridge,
            registry,
            dispatch_tx,
            stopping,
            dispatcher_task: std::sync::Mutex::new(Some(dispatcher_task)),
            reaper_task: std::sync::Mutex::new(Some(reaper_task)),
        }))
    }

    /// Stop accepting new work and wait for the background tasks to exit.
    pub async fn destroy(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.dispatch_tx.send(DispatchRequest::Shutdown);

        let dispatcher_task = self.dispatcher_task.lock().expect("dispatcher_task mutex poisoned").take();
        if let Some(task) = dispatcher_task {
            let _ = task.await;
        }
        let reaper_task = self.reaper_task.lock().expect("reaper_task mutex poisoned").take();
        if let Some(task) = reaper_task {
            let _ = task.await;
        }
    }

    /// Register a new session for `handle` (§3, §6.1 `create_session`).
    pub async fn create_session(&self, handle: SessionHandle) {
        self.registry.insert(Session::new(handle)).await;
    }

    /// Tear down a session on host request (§6.1 `destroy_session`).
    pub async fn destroy_session(&self, handle: SessionHandle) {
        if let Some(session) = self.registry.get(handle).await {
            dispatcher::perform_hangup(&session, &self.registry, &self.bridge).await;
        }
    }

    /// A JSON snapshot of a session's state, for the host's admin/query API.
    pub async fn query_session(&self, handle: SessionHandle) -> Option<Value> {
        let session = self.registry.get(handle).await?;
        let media = session.media.lock().await;
        Some(json!({
            "handle": handle,
            "destroyed": session.is_destroyed(),
            "hangingup": session.is_hanging_up(),
            "audio": {
                "present": media.audio.present,
                "port": media.audio.local_rtp_port,
            },
            "video": {
                "present": media.video.present,
                "port": media.video.local_rtp_port,
            },
            "require_srtp": media.require_srtp,
            "has_srtp_local": media.has_srtp_local,
            "has_srtp_remote": media.has_srtp_remote,
        }))
    }

    /// Enqueue a control-plane request for the Dispatcher to process
    /// (§4.4, §6.1 `handle_message`). Ordering is guaranteed per process
    /// because the Dispatcher has exactly one consumer.
    pub fn handle_message(
        &self,
        handle: SessionHandle,
        transaction: String,
        message: Value,
        jsep: Option<Value>,
    ) -> Result<(), NoSipError> {
        if !message.is_object() {
            return Err(NoSipError::InvalidJson);
        }
        self.dispatch_tx
            .send(DispatchRequest::Envelope { handle, transaction, message, jsep })
            .map_err(|_| NoSipError::WrongState("dispatcher is shutting down".to_string()))
    }

    /// The Relay Loop is started by the Dispatcher itself once a session's
    /// `generate`/`process` call produces an answer (§4.4); there is no
    /// separate host-driven "media is ready" signal to act on here.
    pub async fn setup_media(&self, _handle: SessionHandle) {}

    /// Host-to-peer RTP, called directly from the host gateway's own media
    /// thread rather than routed through the Dispatcher (§4.5).
    pub async fn incoming_rtp(&self, handle: SessionHandle, kind: MediaKind, buf: &[u8]) -> anyhow::Result<()> {
        let Some(session) = self.registry.get(handle).await else {
            return Ok(());
        };
        relay::incoming_rtp(&session, kind, buf).await
    }

    /// Host-to-peer RTCP, mirroring [`Plugin::incoming_rtp`].
    pub async fn incoming_rtcp(&self, handle: SessionHandle, kind: MediaKind, buf: &[u8]) -> anyhow::Result<()> {
        let Some(session) = self.registry.get(handle).await else {
            return Ok(());
        };
        relay::incoming_rtcp(&session, kind, buf).await
    }

    /// Equivalent to a `hangup` control-plane request, but triggered by the
    /// host itself (e.g. ICE failure) rather than by the peer (§6.1).
    pub async fn hangup_media(&self, handle: SessionHandle) {
        if let Some(session) = self.registry.get(handle).await {
            dispatcher::perform_hangup(&session, &self.registry, &self.bridge).await;
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}
