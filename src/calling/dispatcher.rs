//! Control-plane Dispatcher (§4.4): a single worker that consumes a FIFO of
//! request envelopes and serialises every `generate`/`process`/`hangup`/
//! `recording` state transition for every session (§5: per-session
//! transitions are totally ordered because there is exactly one consumer).

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::host::HostBridge;
use super::media::{self, MediaKind};
use super::recording::{self, RecorderSlot, RecordingAction, RecordingRequest};
use super::registry::SessionRegistry;
use super::relay;
use super::sdp;
use super::session::{Session, SessionHandle};
use crate::config::Config;
use crate::error::NoSipError;

const PLUGIN_NAME: &str = "janus.plugin.nosip";

/// One inbound control-plane request, or the shutdown sentinel (§4.4).
pub enum DispatchRequest {
    Envelope {
        handle: SessionHandle,
        transaction: String,
        message: Value,
        jsep: Option<Value>,
    },
    Shutdown,
}

pub type DispatchSender = mpsc::UnboundedSender<DispatchRequest>;
pub type DispatchReceiver = mpsc::UnboundedReceiver<DispatchRequest>;

/// Builds the queue `handle_message` pushes onto and the Dispatcher worker
/// drains from.
pub fn channel() -> (DispatchSender, DispatchReceiver) {
    mpsc::unbounded_channel()
}

/// Drains `receiver` until the shutdown sentinel, dispatching each envelope
/// in turn.
pub async fn run<B: HostBridge + 'static>(
    mut receiver: DispatchReceiver,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
    bridge: Arc<B>,
) {
    while let Some(request) = receiver.recv().await {
        let (handle, transaction, message, jsep) = match request {
            DispatchRequest::Envelope { handle, transaction, message, jsep } => {
                (handle, transaction, message, jsep)
            }
            DispatchRequest::Shutdown => break,
        };

        let Some(session) = registry.get(handle).await else {
            tracing::warn!(handle, "dispatcher: unknown session, dropping request");
            continue;
        };
        if session.is_destroyed() {
            tracing::warn!(handle, "dispatcher: session already destroyed, dropping request");
            continue;
        }

        handle_envelope(&session, &transaction, message, jsep, &registry, &config, &bridge).await;
    }
    tracing::info!("dispatcher shutting down");
}

async fn handle_envelope<B: HostBridge + 'static>(
    session: &Arc<Session>,
    transaction: &str,
    message: Value,
    jsep: Option<Value>,
    registry: &Arc<SessionRegistry>,
    config: &Arc<Config>,
    bridge: &Arc<B>,
) {
    match dispatch_one(session, message, jsep, registry, config, bridge).await {
        Ok((result, local_jsep)) => {
            let event = json!({ "nosip": "event", "result": result });
            bridge.push_event(session.handle, PLUGIN_NAME, transaction, &event, local_jsep.as_ref());
        }
        Err(err) => {
            tracing::warn!(handle = session.handle, error = %err, "control-plane request failed");
            let event = json!({
                "nosip": "event",
                "error_code": err.code(),
                "error": err.to_string(),
            });
            bridge.push_event(session.handle, PLUGIN_NAME, transaction, &event, None);
        }
    }
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, NoSipError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| NoSipError::MissingElement(field.to_string()))
}

fn optional_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

fn optional_bool(value: &Value, field: &str) -> bool {
    value.get(field).and_then(Value::as_bool).unwrap_or(false)
}

async fn dispatch_one<B: HostBridge + 'static>(
    session: &Arc<Session>,
    message: Value,
    jsep: Option<Value>,
    registry: &Arc<SessionRegistry>,
    config: &Arc<Config>,
    bridge: &Arc<B>,
) -> Result<(Value, Option<Value>), NoSipError> {
    let request = required_str(&message, "request")?;
    match request {
        "generate" => handle_generate(session, &message, jsep, config, bridge).await,
        "process" => handle_process(session, &message, config, bridge).await,
        "hangup" => handle_hangup(session, registry, bridge).await,
        "recording" => handle_recording(session, &message, config, bridge).await,
        other => {
            tracing::debug!(request = other, "unknown control-plane request");
            Err(NoSipError::InvalidRequest)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SrtpPolicy {
    None,
    Optional,
    Mandatory,
}

fn parse_srtp_policy(message: &Value) -> Result<SrtpPolicy, NoSipError> {
    match optional_str(message, "srtp") {
        None => Ok(SrtpPolicy::None),
        Some("sdes_optional") => Ok(SrtpPolicy::Optional),
        Some("sdes_mandatory") => Ok(SrtpPolicy::Mandatory),
        Some(other) => Err(NoSipError::InvalidElement(format!("srtp '{}'", other))),
    }
}

/// §4.4 *generate*: allocate local ports, rewrite the host-facing SDP to
/// point at them, and — for an answer — start the Relay Loop.
async fn handle_generate<B: HostBridge + 'static>(
    session: &Arc<Session>,
    message: &Value,
    jsep: Option<Value>,
    config: &Arc<Config>,
    bridge: &Arc<B>,
) -> Result<(Value, Option<Value>), NoSipError> {
    let jsep = jsep.ok_or_else(|| NoSipError::MissingSdp("Missing SDP".to_string()))?;
    let sdp_type = required_str(&jsep, "type")?;
    if sdp_type != "offer" && sdp_type != "answer" {
        return Err(NoSipError::InvalidElement(format!("jsep type '{}'", sdp_type)));
    }
    let sdp_text = required_str(&jsep, "sdp")?;
    let mut doc = sdp::parse(sdp_text).map_err(|e| NoSipError::InvalidSdp(e.to_string()))?;

    if sdp::has_data_channel(&doc) {
        return Err(NoSipError::MissingSdp(
            "The NoSIP plugin does not support DataChannels".to_string(),
        ));
    }

    let srtp_policy = parse_srtp_policy(message)?;
    let is_answer = sdp_type == "answer";
    let has_audio = doc.media.iter().any(|b| b.raw_kind == "audio" && b.port != 0);
    let has_video = doc.media.iter().any(|b| b.raw_kind == "video" && b.port != 0);

    {
        let mut media = session.media.lock().await;

        if is_answer && media.require_srtp && !media.has_srtp_remote {
            return Err(NoSipError::TooStrict);
        }

        match srtp_policy {
            SrtpPolicy::Optional => media.has_srtp_local = true,
            SrtpPolicy::Mandatory => {
                media.has_srtp_local = true;
                media.require_srtp = true;
            }
            SrtpPolicy::None => {}
        }

        if has_audio {
            media::allocate(&mut media, MediaKind::Audio, config)
                .await
                .map_err(|e| NoSipError::IoError(e.to_string()))?;
        }
        if has_video {
            media::allocate(&mut media, MediaKind::Video, config)
                .await
                .map_err(|e| NoSipError::IoError(e.to_string()))?;
        }

        sdp::manipulate(&mut doc, &mut media, config.local_ip, is_answer)
            .map_err(|e| NoSipError::IoError(e.to_string()))?;
    }

    let rewritten = sdp::serialize(&doc);
    *session.last_sdp.lock().await = Some(doc);

    if is_answer {
        start_relay(session, bridge, config).await;
    }

    let result = json!({ "event": "generated", "type": sdp_type, "sdp": rewritten });
    let local_jsep = json!({ "type": sdp_type, "sdp": rewritten });
    Ok((result, Some(local_jsep)))
}

/// §4.4 *process*: ingest the peer's barebone SDP, echo it back as a local
/// JSEP, and — for an answer — start the Relay Loop.
async fn handle_process<B: HostBridge + 'static>(
    session: &Arc<Session>,
    message: &Value,
    config: &Arc<Config>,
    bridge: &Arc<B>,
) -> Result<(Value, Option<Value>), NoSipError> {
    let sdp_type = required_str(message, "type")?;
    if sdp_type != "offer" && sdp_type != "answer" {
        return Err(NoSipError::InvalidElement(format!("type '{}'", sdp_type)));
    }
    let sdp_text = required_str(message, "sdp")?;
    let doc = sdp::parse(sdp_text).map_err(|e| NoSipError::InvalidSdp(e.to_string()))?;

    if sdp::has_data_channel(&doc) {
        return Err(NoSipError::MissingSdp(
            "The NoSIP plugin does not support DataChannels".to_string(),
        ));
    }

    let is_answer = sdp_type == "answer";
    let srtp_policy = parse_srtp_policy(message)?;

    let srtp_label = {
        let mut media = session.media.lock().await;

        if !is_answer {
            media.clear_all_srtp();
        }
        match srtp_policy {
            SrtpPolicy::Optional => media.has_srtp_local = true,
            SrtpPolicy::Mandatory => {
                media.has_srtp_local = true;
                media.require_srtp = true;
            }
            SrtpPolicy::None => {}
        }

        sdp::process(&doc, &mut media, is_answer, false).map_err(|e| NoSipError::InvalidSdp(e.to_string()))?;

        if !media.audio.present && !media.video.present {
            return Err(NoSipError::InvalidSdp("no audio or video media present".to_string()));
        }
        if media.remote_ip.is_none() {
            return Err(NoSipError::InvalidSdp("no remote address could be determined".to_string()));
        }

        if media.require_srtp {
            Some(if media.has_srtp_local { "sdes_mandatory" } else { "sdes_optional" })
        } else if media.has_srtp_local || media.has_srtp_remote {
            Some("sdes_optional")
        } else {
            None
        }
    };

    *session.last_sdp.lock().await = Some(doc);

    if is_answer {
        start_relay(session, bridge, config).await;
    }

    let mut result = json!({ "event": "processed" });
    if let Some(label) = srtp_label {
        result["srtp"] = json!(label);
    }
    let local_jsep = json!({ "type": sdp_type, "sdp": sdp_text });
    Ok((result, Some(local_jsep)))
}

async fn handle_hangup<B: HostBridge + 'static>(
    session: &Arc<Session>,
    registry: &Arc<SessionRegistry>,
    bridge: &Arc<B>,
) -> Result<(Value, Option<Value>), NoSipError> {
    perform_hangup(session, registry, bridge).await;
    Ok((json!({ "event": "hangingup" }), None))
}

/// Idempotent hangup (§8: runs at most once per session, regardless of
/// caller): aborts the Relay Loop, asks the host to close the peer
/// connection, clears SRTP state, and moves the session to the registry's
/// deferred list (§4.6).
pub async fn perform_hangup<B: HostBridge + 'static>(
    session: &Arc<Session>,
    registry: &Arc<SessionRegistry>,
    bridge: &Arc<B>,
) {
    if !session.try_start_hangup() {
        return;
    }
    session.abort_relay_task();
    bridge.close_pc(session.handle);
    {
        let mut media = session.media.lock().await;
        media.clear_all_srtp();
    }
    registry.destroy(session.handle, Instant::now()).await;
}

/// §4.4 *recording*: open or close up to four file sinks, requesting a PLI
/// upstream the moment the user-video recorder is opened.
async fn handle_recording<B: HostBridge + 'static>(
    session: &Arc<Session>,
    message: &Value,
    config: &Arc<Config>,
    bridge: &Arc<B>,
) -> Result<(Value, Option<Value>), NoSipError> {
    let action = match required_str(message, "action")? {
        "start" => RecordingAction::Start,
        "stop" => RecordingAction::Stop,
        other => return Err(NoSipError::InvalidElement(format!("action '{}'", other))),
    };

    let request = RecordingRequest {
        audio: optional_bool(message, "audio"),
        video: optional_bool(message, "video"),
        peer_audio: optional_bool(message, "peer_audio"),
        peer_video: optional_bool(message, "peer_video"),
        filename: optional_str(message, "filename").map(str::to_string),
    };
    if request.is_empty() {
        return Err(NoSipError::MissingElement(
            "audio/video/peer_audio/peer_video".to_string(),
        ));
    }

    let handle_str = session.handle.to_string();

    match action {
        RecordingAction::Start => {
            let media = session.media.lock().await;
            let codec_for = |slot: RecorderSlot| match slot {
                RecorderSlot::UserAudio | RecorderSlot::PeerAudio => media.audio.codec_name.clone(),
                RecorderSlot::UserVideo | RecorderSlot::PeerVideo => media.video.codec_name.clone(),
            };
            let mut recorders = session.recorders.lock().await;
            let started = recording::start(&mut recorders, &request, &handle_str, codec_for)
                .map_err(|e| NoSipError::RecordingError(e.to_string()))?;
            drop(recorders);
            drop(media);

            if started.contains(&RecorderSlot::UserVideo) && config.notify_events {
                bridge.notify_event(PLUGIN_NAME, session.handle, &json!({ "pli": "request" }));
            }
        }
        RecordingAction::Stop => {
            let mut recorders = session.recorders.lock().await;
            recording::stop(&mut recorders, &request);
        }
    }

    Ok((json!({ "event": "recordingupdated" }), None))
}

async fn start_relay<B: HostBridge + 'static>(session: &Arc<Session>, bridge: &Arc<B>, config: &Arc<Config>) {
    let task = tokio::spawn(relay::run(session.clone(), bridge.clone(), config.clone()));
    session.set_relay_task(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calling::host::RecordingBridge;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_range_min: 21000,
            rtp_range_max: 21200,
            notify_events: true,
        })
    }

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=audio 1 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\nm=video 1 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";

    #[tokio::test]
    async fn generate_offer_allocates_ports_and_emits_crypto() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let message = json!({ "request": "generate", "srtp": "sdes_mandatory" });
        let jsep = json!({ "type": "offer", "sdp": OFFER });
        let (result, local_jsep) = dispatch_one(&session, message, Some(jsep), &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap();

        assert_eq!(result["event"], "generated");
        let sdp_out = local_jsep.unwrap()["sdp"].as_str().unwrap().to_string();
        assert!(sdp_out.contains("RTP/SAVP"));
        assert!(sdp_out.contains("a=crypto:1 AES_CM_128_HMAC_SHA1_80"));
        assert!(!session.has_relay_task());
    }

    #[tokio::test]
    async fn generate_rejects_data_channel_offer() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let message = json!({ "request": "generate" });
        let sdp = "v=0\r\nm=audio 1 RTP/AVP 0\r\nm=application 2 DTLS/SCTP webrtc-datachannel\r\n";
        let jsep = json!({ "type": "offer", "sdp": sdp });
        let err = dispatch_one(&session, message, Some(jsep), &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap_err();

        assert_eq!(err.code(), 446);
        assert_eq!(err.to_string(), "The NoSIP plugin does not support DataChannels");
    }

    #[tokio::test]
    async fn process_rejects_data_channel_offer() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let sdp = "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio 40000 RTP/AVP 0\r\nm=application 40004 DTLS/SCTP webrtc-datachannel\r\n";
        let message = json!({ "request": "process", "type": "offer", "sdp": sdp });
        let err = dispatch_one(&session, message, None, &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap_err();

        assert_eq!(err.code(), 446);
        assert_eq!(err.to_string(), "The NoSIP plugin does not support DataChannels");
    }

    #[tokio::test]
    async fn generate_answer_denies_too_strict_srtp() {
        let session = Session::new(1);
        {
            let mut media = session.media.lock().await;
            media.require_srtp = true;
        }
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let message = json!({ "request": "generate" });
        let jsep = json!({ "type": "answer", "sdp": OFFER });
        let err = dispatch_one(&session, message, Some(jsep), &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap_err();

        assert_eq!(err.code(), 450);
    }

    #[tokio::test]
    async fn process_answer_starts_relay_loop() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let answer = "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio 40000 RTP/AVP 111\r\nm=video 40002 RTP/AVP 96\r\n";
        let message = json!({ "request": "process", "type": "answer", "sdp": answer });
        let (result, _) = dispatch_one(&session, message, None, &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap();

        assert_eq!(result["event"], "processed");
        assert!(session.has_relay_task());
    }

    #[tokio::test]
    async fn process_offer_alone_does_not_start_relay_loop() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let offer = "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio 40000 RTP/AVP 111\r\n";
        let message = json!({ "request": "process", "type": "offer", "sdp": offer });
        dispatch_one(&session, message, None, &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap();

        assert!(!session.has_relay_task());
    }

    #[tokio::test]
    async fn process_rejects_sdp_without_media() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let config = test_config();

        let empty = "v=0\r\nc=IN IP4 203.0.113.5\r\n";
        let message = json!({ "request": "process", "type": "offer", "sdp": empty });
        let err = dispatch_one(&session, message, None, &SessionRegistry::new(), &config, &bridge)
            .await
            .unwrap_err();

        assert_eq!(err.code(), 447);
    }

    #[tokio::test]
    async fn hangup_runs_at_most_once() {
        let registry = SessionRegistry::new();
        let session = Session::new(1);
        registry.insert(session.clone()).await;
        let bridge = Arc::new(RecordingBridge::new());

        perform_hangup(&session, &registry, &bridge).await;
        perform_hangup(&session, &registry, &bridge).await;

        let close_calls = bridge
            .calls()
            .into_iter()
            .filter(|c| matches!(c, crate::calling::host::BridgeCall::ClosePc { .. }))
            .count();
        assert_eq!(close_calls, 1);
    }

    #[tokio::test]
    async fn recording_rejects_empty_request() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let message = json!({ "request": "recording", "action": "start" });
        let err = dispatch_one(&session, message, None, &SessionRegistry::new(), &test_config(), &bridge)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 443);
    }

    #[tokio::test]
    async fn unknown_request_is_rejected() {
        let session = Session::new(1);
        let bridge = Arc::new(RecordingBridge::new());
        let message = json!({ "request": "frobnicate" });
        let err = dispatch_one(&session, message, None, &SessionRegistry::new(), &test_config(), &bridge)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 442);
    }
}
