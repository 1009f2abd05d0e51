//! SDP rewriter: ingest a peer's barebone SDP (§4.3.1 *process*) and rewrite
//! the host's WebRTC-side SDP to point at locally bound ports (§4.3.2
//! *manipulate*).
//!
//! The document model keeps every line the parser doesn't specifically care
//! about untouched and in its original position, so `manipulate` only ever
//! changes `c=`, the `m=` port/proto, and appends a `crypto` attribute —
//! everything else round-trips byte for byte.

use std::net::IpAddr;

use anyhow::{Context, Result};

use super::media::{MediaDescriptor, MediaKind};
use super::srtp;

/// One `m=` block: the line itself plus every attribute line up to the next `m=`.
#[derive(Debug, Clone)]
pub struct MediaBlock {
    pub raw_kind: String,
    pub port: u16,
    pub proto: String,
    pub ptypes: Vec<u8>,
    pub lines: Vec<String>,
}

impl MediaBlock {
    pub fn kind(&self) -> Option<MediaKind> {
        match self.raw_kind.as_str() {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    fn connection(&self) -> Option<IpAddr> {
        self.lines.iter().find_map(|l| parse_connection_line(l))
    }

    fn direction(&self) -> Direction {
        for line in &self.lines {
            match line.trim() {
                "a=sendonly" => return Direction::SendOnly,
                "a=recvonly" => return Direction::RecvOnly,
                "a=inactive" => return Direction::Inactive,
                "a=sendrecv" => return Direction::SendRecv,
                _ => {}
            }
        }
        Direction::SendRecv
    }

    fn crypto_lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter().filter(|l| l.starts_with("a=crypto:"))
    }

    fn rtpmap_name(&self, pt: u8) -> Option<String> {
        let prefix = format!("a=rtpmap:{} ", pt);
        self.lines.iter().find_map(|l| {
            l.strip_prefix(&prefix)
                .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
        })
    }

    fn set_line(&mut self, predicate: impl Fn(&str) -> bool, new_line: String) {
        if let Some(existing) = self.lines.iter_mut().find(|l| predicate(l)) {
            *existing = new_line;
        } else {
            self.lines.insert(0, new_line);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    SendOnly,
    RecvOnly,
    Inactive,
    SendRecv,
}

/// A parsed SDP document: session-level lines in original order, then each
/// `m=` block in original order.
#[derive(Debug, Clone)]
pub struct SdpDocument {
    pub session_lines: Vec<String>,
    pub media: Vec<MediaBlock>,
}

fn parse_connection_line(line: &str) -> Option<IpAddr> {
    let rest = line.trim().strip_prefix("c=")?;
    let mut parts = rest.split_whitespace();
    let _nettype = parts.next()?; // "IN"
    let _addrtype = parts.next()?; // "IP4"
    let addr = parts.next()?;
    addr.parse().ok()
}

/// Parse an SDP blob into session-level lines and media blocks.
pub fn parse(sdp: &str) -> Result<SdpDocument> {
    let mut session_lines = Vec::new();
    let mut media: Vec<MediaBlock> = Vec::new();

    for raw in sdp.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("m=") {
            let mut parts = rest.split_whitespace();
            let raw_kind = parts.next().context("m= line missing media type")?.to_string();
            let port: u16 = parts
                .next()
                .context("m= line missing port")?
                .parse()
                .context("m= line has non-numeric port")?;
            let proto = parts.next().context("m= line missing proto")?.to_string();
            let ptypes: Vec<u8> = parts.filter_map(|p| p.parse().ok()).collect();
            media.push(MediaBlock {
                raw_kind,
                port,
                proto,
                ptypes,
                lines: Vec::new(),
            });
        } else if let Some(block) = media.last_mut() {
            block.lines.push(line.to_string());
        } else {
            session_lines.push(line.to_string());
        }
    }

    Ok(SdpDocument { session_lines, media })
}

/// Serialize a document back into an SDP string with trailing CRLF per line.
pub fn serialize(doc: &SdpDocument) -> String {
    let mut out = String::new();
    for line in &doc.session_lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    for block in &doc.media {
        let ptypes: Vec<String> = block.ptypes.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!(
            "m={} {} {} {}\r\n",
            block.raw_kind,
            block.port,
            block.proto,
            ptypes.join(" ")
        ));
        for line in &block.lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
    }
    out
}

/// Does this document contain an `m=application` line (data channel offer)?
pub fn has_data_channel(doc: &SdpDocument) -> bool {
    doc.media.iter().any(|b| b.raw_kind == "application")
}

/// Result of [`process`]: whether the remote endpoint actually changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutcome {
    pub changed: bool,
}

/// Ingest a peer's barebone SDP into `descriptor` (§4.3.1).
pub fn process(
    doc: &SdpDocument,
    descriptor: &mut MediaDescriptor,
    answer: bool,
    update: bool,
) -> Result<ProcessOutcome> {
    let mut changed = false;

    let session_ip = doc
        .session_lines
        .iter()
        .find_map(|l| parse_connection_line(l));
    if let Some(ip) = session_ip {
        let ip_str = ip.to_string();
        if update && descriptor.remote_ip.as_deref() != Some(ip_str.as_str()) {
            changed = true;
        }
        descriptor.remote_ip = Some(ip_str);
    }

    for block in &doc.media {
        let kind = match block.kind() {
            Some(k) => k,
            None => {
                tracing::warn!(media_type = %block.raw_kind, "ignoring unsupported media line");
                continue;
            }
        };

        if block.proto.eq_ignore_ascii_case("RTP/SAVP") {
            descriptor.require_srtp = true;
        }

        if block.port == 0 {
            descriptor.kind_mut(kind).send_enabled = false;
        } else {
            let state = descriptor.kind_mut(kind);
            state.present = true;
            if state.remote_rtp_port != block.port {
                if update {
                    changed = true;
                }
                state.remote_rtp_port = block.port;
                state.remote_rtcp_port = block.port + 1;
            }

            match block.direction() {
                Direction::SendOnly | Direction::Inactive => state.send_enabled = false,
                Direction::RecvOnly | Direction::SendRecv => state.send_enabled = true,
            }
        }

        if let Some(ip) = block.connection() {
            let ip_str = ip.to_string();
            if update && descriptor.remote_ip.as_deref() != Some(ip_str.as_str()) {
                changed = true;
            }
            descriptor.remote_ip = Some(ip_str);
        }

        if descriptor.kind(kind).srtp_in.is_none() {
            if let Some(crypto_line) = block.crypto_lines().next() {
                match srtp::parse_crypto_line(crypto_line) {
                    Ok(material) => descriptor.setup_remote_srtp(kind, &material),
                    Err(e) => tracing::warn!(error = %e, kind = %kind.as_str(), "invalid crypto line, ignoring"),
                }
            }
        }

        if answer {
            if let Some(&pt) = block.ptypes.first() {
                let codec_name = block.rtpmap_name(pt);
                let state = descriptor.kind_mut(kind);
                state.payload_type = Some(pt);
                state.codec_name = codec_name;
            }
        }
    }

    if changed {
        descriptor.notify_updated();
    }

    Ok(ProcessOutcome { changed })
}

/// Rewrite the host-facing SDP `doc` in place with locally allocated ports,
/// SRTP crypto attributes and the configured local address (§4.3.2).
///
/// `answer` controls whether the negotiated payload type is remembered (the
/// offer side doesn't yet know which payload type will win).
pub fn manipulate(
    doc: &mut SdpDocument,
    descriptor: &mut MediaDescriptor,
    local_ip: IpAddr,
    answer: bool,
) -> Result<()> {
    let local_ip_line = format!("c=IN IP4 {}", local_ip);

    for block in &mut doc.media {
        let kind = match block.kind() {
            Some(k) => k,
            None => continue,
        };

        let require_srtp = descriptor.require_srtp;
        block.proto = if require_srtp {
            "RTP/SAVP".to_string()
        } else {
            "RTP/AVP".to_string()
        };

        let local_port = descriptor.kind(kind).local_rtp_port;
        block.port = local_port;

        block.set_line(|l| l.starts_with("c=IN"), local_ip_line.clone());

        if descriptor.has_srtp_local {
            let material = descriptor.setup_local_srtp(kind, 1)?;
            block.lines.push(material.to_crypto_line());
        }

        if answer {
            if let Some(&pt) = block.ptypes.first() {
                descriptor.kind_mut(kind).payload_type = Some(pt);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 203.0.113.5\r\ns=-\r\nc=IN IP4 203.0.113.5\r\nt=0 0\r\nm=audio 40000 RTP/SAVP 111\r\na=rtpmap:111 opus/48000/2\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\r\nm=video 40002 RTP/SAVP 96\r\na=rtpmap:96 VP8/90000\r\n";

    #[test]
    fn parses_and_serializes_round_trip_structure() {
        let doc = parse(OFFER).unwrap();
        assert_eq!(doc.media.len(), 2);
        assert_eq!(doc.media[0].raw_kind, "audio");
        assert_eq!(doc.media[0].port, 40000);
        assert_eq!(doc.media[1].raw_kind, "video");
        assert_eq!(doc.media[1].ptypes, vec![96]);
    }

    #[test]
    fn process_sets_remote_endpoints_and_srtp() {
        let doc = parse(OFFER).unwrap();
        let mut descriptor = MediaDescriptor::new();
        let outcome = process(&doc, &mut descriptor, true, false).unwrap();

        assert!(!outcome.changed); // not an update, so no "changed" bookkeeping
        assert_eq!(descriptor.remote_ip.as_deref(), Some("203.0.113.5"));
        assert!(descriptor.audio.present);
        assert_eq!(descriptor.audio.remote_rtp_port, 40000);
        assert_eq!(descriptor.audio.remote_rtcp_port, 40001);
        assert!(descriptor.require_srtp);
        assert!(descriptor.has_srtp_remote);
        assert!(descriptor.audio.srtp_in.is_some());
        assert_eq!(descriptor.audio.payload_type, Some(111));
        assert_eq!(descriptor.audio.codec_name.as_deref(), Some("opus"));
        assert_eq!(descriptor.video.payload_type, Some(96));
    }

    #[test]
    fn second_crypto_line_for_same_kind_is_ignored() {
        let sdp = "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio 40000 RTP/SAVP 111\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\r\na=crypto:2 AES_CM_128_HMAC_SHA1_32 inline:BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB\r\n";
        let doc = parse(sdp).unwrap();
        let mut descriptor = MediaDescriptor::new();
        process(&doc, &mut descriptor, false, false).unwrap();

        assert_eq!(descriptor.audio.suite_in, Some(srtp::SrtpSuite::Tag80));
    }

    #[test]
    fn zero_port_disables_send_without_clearing_other_state() {
        let doc = parse(OFFER).unwrap();
        let mut descriptor = MediaDescriptor::new();
        process(&doc, &mut descriptor, true, false).unwrap();

        let update_sdp = "v=0\r\nc=IN IP4 203.0.113.5\r\nm=audio 0 RTP/SAVP 111\r\n";
        let update_doc = parse(update_sdp).unwrap();
        process(&update_doc, &mut descriptor, false, true).unwrap();

        assert!(!descriptor.audio.send_enabled);
        assert_eq!(descriptor.audio.remote_rtp_port, 40000); // untouched
    }

    #[test]
    fn update_with_changed_remote_ip_sets_updated_and_wakes() {
        let doc = parse(OFFER).unwrap();
        let mut descriptor = MediaDescriptor::new();
        process(&doc, &mut descriptor, true, false).unwrap();
        descriptor.updated = false;

        let reoffer = "v=0\r\nc=IN IP4 198.51.100.9\r\nm=audio 40000 RTP/SAVP 111\r\nm=video 40002 RTP/SAVP 96\r\n";
        let reoffer_doc = parse(reoffer).unwrap();
        let outcome = process(&reoffer_doc, &mut descriptor, false, true).unwrap();

        assert!(outcome.changed);
        assert!(descriptor.updated);
        assert_eq!(descriptor.remote_ip.as_deref(), Some("198.51.100.9"));
    }

    #[test]
    fn rejects_data_channel_offers() {
        let sdp = "v=0\r\nm=audio 1 RTP/AVP 0\r\nm=application 2 DTLS/SCTP webrtc-datachannel\r\n";
        let doc = parse(sdp).unwrap();
        assert!(has_data_channel(&doc));
    }

    #[test]
    fn manipulate_rewrites_proto_port_and_crypto_preserving_order() {
        let host_sdp = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\nm=audio 1 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:111 opus/48000/2\r\nm=video 1 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:96 VP8/90000\r\n";
        let mut doc = parse(host_sdp).unwrap();
        let mut descriptor = MediaDescriptor::new();
        descriptor.audio.local_rtp_port = 20000;
        descriptor.video.local_rtp_port = 20002;
        descriptor.require_srtp = true;
        descriptor.has_srtp_local = true;

        manipulate(&mut doc, &mut descriptor, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), true).unwrap();

        assert_eq!(doc.media[0].proto, "RTP/SAVP");
        assert_eq!(doc.media[0].port, 20000);
        assert_eq!(doc.media[1].port, 20002);
        assert_eq!(doc.media[0].ptypes, vec![111]); // untouched
        assert!(doc.media[0].lines.iter().any(|l| l.starts_with("a=crypto:1 AES_CM_128_HMAC_SHA1_80")));
        assert!(doc.media[1].lines.iter().any(|l| l.starts_with("a=crypto:1 AES_CM_128_HMAC_SHA1_80")));
        assert_eq!(descriptor.audio.payload_type, Some(111));

        let out = serialize(&doc);
        assert!(out.contains("m=audio 20000 RTP/SAVP 111"));
        assert!(out.contains("m=video 20002 RTP/SAVP 96"));
    }

    #[test]
    fn manipulate_uses_avp_when_srtp_not_required() {
        let host_sdp = "v=0\r\nm=audio 1 UDP/TLS/RTP/SAVPF 0\r\nc=IN IP4 0.0.0.0\r\n";
        let mut doc = parse(host_sdp).unwrap();
        let mut descriptor = MediaDescriptor::new();
        descriptor.audio.local_rtp_port = 20000;

        manipulate(&mut doc, &mut descriptor, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), true).unwrap();
        assert_eq!(doc.media[0].proto, "RTP/AVP");
        assert!(!doc.media[0].lines.iter().any(|l| l.starts_with("a=crypto:")));
    }
}
