//! Bidirectional RTP/RTCP relay (§4.5).
//!
//! [`run`] is the per-session worker spawned once a session reaches
//! `ready` (on answer): it fans in the up-to-four UDP sockets plus the wake
//! notification and moves peer-sourced packets toward the host gateway.
//! [`incoming_rtp`]/[`incoming_rtcp`] are the host-to-peer direction, called
//! directly from the host's own execution context rather than from this loop.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use super::host::HostBridge;
use super::media::MediaKind;
use super::recording::RecorderSlot;
use super::rtcp;
use super::rtp;
use super::session::Session;
use super::srtp::SrtpError;
use crate::config::Config;

const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

async fn recv_opt(socket: &Option<Arc<UdpSocket>>, buf: &mut [u8]) -> std::io::Result<usize> {
    match socket {
        Some(s) => s.recv(buf).await,
        None => std::future::pending().await,
    }
}

async fn resolve_remote_ip(addr: &str) -> Result<IpAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((addr, 0u16))
        .await
        .with_context(|| format!("failed to resolve remote address {}", addr))?;
    addrs
        .next()
        .map(|a| a.ip())
        .with_context(|| format!("no addresses found for {}", addr))
}

async fn connect_kind_sockets(
    rtp_socket: &Option<Arc<UdpSocket>>,
    rtcp_socket: &Option<Arc<UdpSocket>>,
    ip: IpAddr,
    remote_rtp_port: u16,
    remote_rtcp_port: u16,
) -> Result<()> {
    if let Some(socket) = rtp_socket {
        if remote_rtp_port != 0 {
            socket
                .connect(SocketAddr::new(ip, remote_rtp_port))
                .await
                .context("failed to connect RTP socket to remote endpoint")?;
        }
    }
    if let Some(socket) = rtcp_socket {
        if remote_rtcp_port != 0 {
            socket
                .connect(SocketAddr::new(ip, remote_rtcp_port))
                .await
                .context("failed to connect RTCP socket to remote endpoint")?;
        }
    }
    Ok(())
}

/// Re-resolve and re-associate sockets with the stored remote endpoint.
///
/// A resolution *failure* must never be mistaken for the reconnect trigger
/// (§9 known soft bug (c)): only a successful resolution clears `updated` and
/// re-associates sockets; on failure the flag is left set so the next wait
/// cycle tries again.
async fn reassociate_if_updated(session: &Arc<Session>) {
    let (should_try, remote_ip, audio, video) = {
        let media = session.media.lock().await;
        (
            media.updated,
            media.remote_ip.clone(),
            (
                media.audio.rtp_socket.clone(),
                media.audio.rtcp_socket.clone(),
                media.audio.remote_rtp_port,
                media.audio.remote_rtcp_port,
                media.audio.present,
            ),
            (
                media.video.rtp_socket.clone(),
                media.video.rtcp_socket.clone(),
                media.video.remote_rtp_port,
                media.video.remote_rtcp_port,
                media.video.present,
            ),
        )
    };

    if !should_try {
        return;
    }
    let Some(remote_ip) = remote_ip else { return };

    match resolve_remote_ip(&remote_ip).await {
        Ok(ip) => {
            if audio.4 {
                let _ = connect_kind_sockets(&audio.0, &audio.1, ip, audio.2, audio.3).await;
            }
            if video.4 {
                let _ = connect_kind_sockets(&video.0, &video.1, ip, video.2, video.3).await;
            }
            let mut media = session.media.lock().await;
            media.updated = false;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to resolve remote address, will retry");
        }
    }
}

async fn handle_peer_rtp<B: HostBridge>(session: &Arc<Session>, bridge: &Arc<B>, kind: MediaKind, data: &mut [u8]) {
    let mut working = {
        let mut media = session.media.lock().await;
        let header = match rtp::parse_header(data) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed peer RTP packet");
                return;
            }
        };

        let has_srtp_remote = media.has_srtp_remote;
        let state = media.kind_mut(kind);
        if state.inbound_ssrc != Some(header.ssrc) {
            state.inbound_ssrc = Some(header.ssrc);
        }

        let mut working = data.to_vec();
        if has_srtp_remote {
            if let Some(srtp_in) = state.srtp_in.as_mut() {
                match srtp_in.unprotect(&working) {
                    Ok(plain) => working = plain,
                    Err(SrtpError::Replay) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping peer RTP packet: SRTP unprotect failed");
                        return;
                    }
                }
            }
        }

        let header = match rtp::parse_header(&working) {
            Ok(h) => h,
            Err(_) => return,
        };
        media.kind_mut(kind).switching.rewrite_outbound(&mut working, header);
        working
    };

    {
        let mut recorders = session.recorders.lock().await;
        let slot = match kind {
            MediaKind::Audio => RecorderSlot::PeerAudio,
            MediaKind::Video => RecorderSlot::PeerVideo,
        };
        if let Some(recorder) = recorders.get_mut(slot) {
            if let Err(e) = recorder.write_packet(&working) {
                tracing::warn!(error = %e, "failed to write peer recording");
            }
        }
    }

    bridge.relay_rtp(session.handle, kind, &working);
}

async fn handle_peer_rtcp<B: HostBridge>(session: &Arc<Session>, bridge: &Arc<B>, kind: MediaKind, data: &[u8]) {
    let mut media = session.media.lock().await;
    let has_srtp_remote = media.has_srtp_remote;
    let state = media.kind_mut(kind);

    let plain = if has_srtp_remote {
        match state.srtp_in.as_mut() {
            Some(srtp_in) => match srtp_in.unprotect_rtcp(data) {
                Ok(plain) => plain,
                Err(SrtpError::Replay) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping peer RTCP packet: SRTCP unprotect failed");
                    return;
                }
            },
            None => data.to_vec(),
        }
    } else {
        data.to_vec()
    };
    drop(media);

    bridge.relay_rtcp(session.handle, kind, &plain);
}

/// Send an RTP packet arriving from the host gateway out to the peer,
/// SRTP-protecting it first if negotiated (§4.5 host→peer path).
pub async fn incoming_rtp(session: &Arc<Session>, kind: MediaKind, data: &[u8]) -> Result<()> {
    let (socket, out_buf) = {
        let mut media = session.media.lock().await;
        let has_srtp_local = media.has_srtp_local;
        let state = media.kind_mut(kind);
        if !state.send_enabled {
            return Ok(());
        }
        if let Ok(header) = rtp::parse_header(data) {
            if state.outbound_ssrc.is_none() {
                state.outbound_ssrc = Some(header.ssrc);
            }
        }
        let socket = state.rtp_socket.clone();
        let out_buf = if has_srtp_local {
            let srtp_out = state
                .srtp_out
                .as_mut()
                .context("missing outbound SRTP context")?;
            srtp_out.protect(data)?
        } else {
            data.to_vec()
        };
        (socket, out_buf)
    };

    if let Some(socket) = socket {
        socket.send(&out_buf).await.context("failed to send RTP to peer")?;
    }
    Ok(())
}

/// Send an RTCP packet arriving from the host gateway out to the peer, first
/// fixing up the SSRC fields, then SRTCP-protecting it if negotiated.
pub async fn incoming_rtcp(session: &Arc<Session>, kind: MediaKind, data: &[u8]) -> Result<()> {
    let (socket, out_buf) = {
        let mut media = session.media.lock().await;
        let has_srtp_local = media.has_srtp_local;
        let host_ssrc = media.kind(kind).outbound_ssrc;
        let peer_ssrc = media.kind(kind).inbound_ssrc;

        let mut packet = data.to_vec();
        if let Some(sender) = host_ssrc {
            rtcp::fix_ssrc(&mut packet, sender, peer_ssrc);
        }

        let state = media.kind_mut(kind);
        let socket = state.rtcp_socket.clone();
        let out_buf = if has_srtp_local {
            let srtp_out = state
                .srtp_out
                .as_mut()
                .context("missing outbound SRTP context")?;
            srtp_out.protect_rtcp(&packet)?
        } else {
            packet
        };
        (socket, out_buf)
    };

    if let Some(socket) = socket {
        socket
            .send(&out_buf)
            .await
            .context("failed to send RTCP to peer")?;
    }
    Ok(())
}

/// The peer-to-host direction: one worker per active session (§4.5).
pub async fn run<B: HostBridge + 'static>(session: Arc<Session>, bridge: Arc<B>, _config: Arc<Config>) {
    tracing::info!(session = session.handle, "relay loop starting");

    loop {
        if session.is_destroyed() || session.is_hanging_up() {
            break;
        }

        reassociate_if_updated(&session).await;

        let (audio_rtp, audio_rtcp, video_rtp, video_rtcp, wake) = {
            let media = session.media.lock().await;
            (
                media.audio.rtp_socket.clone(),
                media.audio.rtcp_socket.clone(),
                media.video.rtp_socket.clone(),
                media.video.rtcp_socket.clone(),
                media.wake.clone(),
            )
        };

        let mut audio_rtp_buf = [0u8; rtp::MAX_PACKET_SIZE];
        let mut audio_rtcp_buf = [0u8; rtp::MAX_PACKET_SIZE];
        let mut video_rtp_buf = [0u8; rtp::MAX_PACKET_SIZE];
        let mut video_rtcp_buf = [0u8; rtp::MAX_PACKET_SIZE];

        tokio::select! {
            _ = tokio::time::sleep(WAIT_TIMEOUT) => {}
            _ = wake.notified() => {}
            res = recv_opt(&audio_rtp, &mut audio_rtp_buf) => {
                match res {
                    Ok(n) => handle_peer_rtp(&session, &bridge, MediaKind::Audio, &mut audio_rtp_buf[..n]).await,
                    Err(e) => handle_socket_error(&session, &bridge, MediaKind::Audio, false, e).await,
                }
            }
            res = recv_opt(&audio_rtcp, &mut audio_rtcp_buf) => {
                match res {
                    Ok(n) => handle_peer_rtcp(&session, &bridge, MediaKind::Audio, &audio_rtcp_buf[..n]).await,
                    Err(e) => handle_socket_error(&session, &bridge, MediaKind::Audio, true, e).await,
                }
            }
            res = recv_opt(&video_rtp, &mut video_rtp_buf) => {
                match res {
                    Ok(n) => handle_peer_rtp(&session, &bridge, MediaKind::Video, &mut video_rtp_buf[..n]).await,
                    Err(e) => handle_socket_error(&session, &bridge, MediaKind::Video, false, e).await,
                }
            }
            res = recv_opt(&video_rtcp, &mut video_rtcp_buf) => {
                match res {
                    Ok(n) => handle_peer_rtcp(&session, &bridge, MediaKind::Video, &video_rtcp_buf[..n]).await,
                    Err(e) => handle_socket_error(&session, &bridge, MediaKind::Video, true, e).await,
                }
            }
        }
    }

    tracing::info!(session = session.handle, "relay loop exiting");
}

/// Per §4.5/§7: an RTCP-socket connection refusal closes only that socket;
/// any other transport error escalates to closing the peer connection.
async fn handle_socket_error<B: HostBridge>(session: &Arc<Session>, bridge: &Arc<B>, kind: MediaKind, is_rtcp: bool, err: std::io::Error) {
    if is_rtcp && err.kind() == std::io::ErrorKind::ConnectionRefused {
        tracing::warn!(session = session.handle, kind = %kind.as_str(), "RTCP socket refused, closing it only");
        let mut media = session.media.lock().await;
        media.kind_mut(kind).rtcp_socket = None;
        return;
    }
    tracing::error!(session = session.handle, error = %err, "fatal relay socket error, closing peer connection");
    session.mark_hanging_up();
    bridge.close_pc(session.handle);
}
