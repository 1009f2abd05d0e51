//! Media descriptor and port allocator (§3, §4.1).
//!
//! [`MediaDescriptor`] is the per-session bundle of sockets, SRTP contexts and
//! RTP switching state the Relay Loop and Control-plane Dispatcher share.
//! [`allocate`] is the Port Allocator: it binds a fresh RTP/RTCP pair for one
//! media kind by probing random even ports in the configured range.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use getrandom::getrandom;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use super::rtp::{self, SwitchingContext, AUDIO_TIMESTAMP_STEP_HINT, VIDEO_TIMESTAMP_STEP_HINT};
use super::srtp::{SrtpInbound, SrtpOutbound, SrtpKeyingMaterial, SrtpSuite};
use crate::config::Config;

/// Audio or video, the only two media kinds this bridge understands (§1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    fn timestamp_step_hint(self) -> u32 {
        match self {
            MediaKind::Audio => AUDIO_TIMESTAMP_STEP_HINT,
            MediaKind::Video => VIDEO_TIMESTAMP_STEP_HINT,
        }
    }
}

/// Maximum number of RTP/RTCP bind attempts per kind before allocation fails (§4.1).
const MAX_BIND_ATTEMPTS: u32 = 100;

/// Per-kind socket, SRTP and rewriting state (§3 MediaDescriptor).
pub struct KindState {
    pub present: bool,
    pub rtp_socket: Option<Arc<UdpSocket>>,
    pub rtcp_socket: Option<Arc<UdpSocket>>,
    pub local_rtp_port: u16,
    pub local_rtcp_port: u16,
    pub remote_rtp_port: u16,
    pub remote_rtcp_port: u16,
    /// Host-side SSRC, learned the first time the host relays a packet.
    pub outbound_ssrc: Option<u32>,
    /// Peer's SSRC, learned from the first inbound packet.
    pub inbound_ssrc: Option<u32>,
    pub payload_type: Option<u8>,
    pub codec_name: Option<String>,
    pub send_enabled: bool,

    pub suite_out: Option<SrtpSuite>,
    pub suite_in: Option<SrtpSuite>,
    pub srtp_out: Option<SrtpOutbound>,
    pub srtp_in: Option<SrtpInbound>,

    pub switching: SwitchingContext,
}

impl KindState {
    fn new(kind: MediaKind) -> Self {
        KindState {
            present: false,
            rtp_socket: None,
            rtcp_socket: None,
            local_rtp_port: 0,
            local_rtcp_port: 0,
            remote_rtp_port: 0,
            remote_rtcp_port: 0,
            outbound_ssrc: None,
            inbound_ssrc: None,
            payload_type: None,
            codec_name: None,
            send_enabled: true,
            suite_out: None,
            suite_in: None,
            srtp_out: None,
            srtp_in: None,
            switching: SwitchingContext::new(kind.timestamp_step_hint()),
        }
    }

    fn close_sockets(&mut self) {
        self.rtp_socket = None;
        self.rtcp_socket = None;
    }

    /// Clear SRTP state for this kind (§4.2 cleanup).
    pub fn clear_srtp(&mut self) {
        self.suite_out = None;
        self.suite_in = None;
        self.srtp_out = None;
        self.srtp_in = None;
    }
}

/// The full per-session media bundle (§3).
pub struct MediaDescriptor {
    pub audio: KindState,
    pub video: KindState,

    pub remote_ip: Option<String>,
    /// Set by the Dispatcher when the remote endpoint changes; cleared by the
    /// Relay Loop once it has re-associated sockets (§4.3.1, §4.5, §9).
    pub updated: bool,
    /// Wakes a parked Relay Loop in place of a self-pipe (§9).
    pub wake: Arc<Notify>,

    pub require_srtp: bool,
    pub has_srtp_local: bool,
    pub has_srtp_remote: bool,
}

impl MediaDescriptor {
    pub fn new() -> Self {
        MediaDescriptor {
            audio: KindState::new(MediaKind::Audio),
            video: KindState::new(MediaKind::Video),
            remote_ip: None,
            updated: false,
            wake: Arc::new(Notify::new()),
            require_srtp: false,
            has_srtp_local: false,
            has_srtp_remote: false,
        }
    }

    pub fn kind(&self, kind: MediaKind) -> &KindState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub fn kind_mut(&mut self, kind: MediaKind) -> &mut KindState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    /// Set up the local (outbound) SRTP context for `kind`, generating fresh
    /// key material and always offering suite 80 (§4.2 local setup).
    pub fn setup_local_srtp(&mut self, kind: MediaKind, tag: u32) -> Result<SrtpKeyingMaterial> {
        let material = SrtpKeyingMaterial::generate(tag)?;
        let state = self.kind_mut(kind);
        state.srtp_out = Some(SrtpOutbound::new(&material));
        state.suite_out = Some(material.suite);
        self.has_srtp_local = true;
        Ok(material)
    }

    /// Install the remote (inbound) SRTP context for `kind` from a parsed
    /// crypto line's keying material (§4.2 remote setup).
    pub fn setup_remote_srtp(&mut self, kind: MediaKind, material: &SrtpKeyingMaterial) {
        let state = self.kind_mut(kind);
        state.srtp_in = Some(SrtpInbound::new(material));
        state.suite_in = Some(material.suite);
        self.has_srtp_remote = true;
    }

    /// Release every SRTP context and flag for both kinds (§4.2 cleanup).
    pub fn clear_all_srtp(&mut self) {
        self.audio.clear_srtp();
        self.video.clear_srtp();
        self.has_srtp_local = false;
        self.has_srtp_remote = false;
        self.require_srtp = false;
    }

    /// Signal the Relay Loop that something it should reread has changed.
    pub fn notify_updated(&mut self) {
        self.updated = true;
        self.wake.notify_one();
    }
}

impl Default for MediaDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a uniformly random port in `[min,max]`, rounded up to even.
fn random_even_port(min: u16, max: u16) -> Result<u16> {
    if min > max {
        bail!("invalid RTP port range: {}-{}", min, max);
    }
    let span = (max - min) as u32 + 1;
    let mut buf = [0u8; 4];
    getrandom(&mut buf).context("failed to generate random port")?;
    let offset = u32::from_le_bytes(buf) % span;
    let mut port = min + offset as u16;
    if port % 2 != 0 {
        port = port.saturating_add(1).min(max);
        if port % 2 != 0 {
            // range collapsed to a single odd port; nudge down instead.
            port -= 1;
        }
    }
    Ok(port)
}

/// Bind the RTP/RTCP pair for `kind` within `[config.rtp_range_min, rtp_range_max]`,
/// retrying up to [`MAX_BIND_ATTEMPTS`] times total (§4.1).
pub async fn allocate(
    descriptor: &mut MediaDescriptor,
    kind: MediaKind,
    config: &Config,
) -> Result<()> {
    let state = descriptor.kind_mut(kind);
    state.close_sockets();

    let local_ip = config.local_ip;
    let mut last_err: Option<anyhow::Error> = None;

    for _ in 0..MAX_BIND_ATTEMPTS {
        let rtp_port = match random_even_port(config.rtp_range_min, config.rtp_range_max) {
            Ok(p) => p,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        let rtcp_port = rtp_port.saturating_add(1);
        if rtcp_port > config.rtp_range_max || rtcp_port == rtp_port {
            continue;
        }

        let rtp_addr = SocketAddr::new(local_ip, rtp_port);
        let rtp_socket = match UdpSocket::bind(rtp_addr).await {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(anyhow::Error::new(e).context(format!("bind {} failed", rtp_addr)));
                continue;
            }
        };

        let rtcp_addr = SocketAddr::new(local_ip, rtcp_port);
        let rtcp_socket = match UdpSocket::bind(rtcp_addr).await {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(anyhow::Error::new(e).context(format!("bind {} failed", rtcp_addr)));
                drop(rtp_socket);
                continue;
            }
        };

        state.local_rtp_port = rtp_port;
        state.local_rtcp_port = rtcp_port;
        state.rtp_socket = Some(Arc::new(rtp_socket));
        state.rtcp_socket = Some(Arc::new(rtcp_socket));
        state.present = true;
        return Ok(());
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("exhausted port allocation attempts")))
        .with_context(|| format!("failed to allocate {} RTP/RTCP ports", kind.as_str()))
}
