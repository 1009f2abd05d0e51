//! RTP header parsing and the per-stream switching context (RFC 3550).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use anyhow::{bail, Result};

/// Minimum RTP header size in bytes (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// Maximum datagram size the relay loop reads into (§4.5).
pub const MAX_PACKET_SIZE: usize = 1500;

/// Step hint applied to the switching context for an audio stream with no
/// measured inter-frame delta yet (960 samples at the teacher's default rate).
pub const AUDIO_TIMESTAMP_STEP_HINT: u32 = 960;
/// Step hint applied to the switching context for a video stream with no
/// measured inter-frame delta yet.
pub const VIDEO_TIMESTAMP_STEP_HINT: u32 = 4500;

/// Compute the full RTP header length from raw packet bytes, accounting for
/// CSRC entries and header extensions (RFC 3550 §5.3.1).
pub fn full_header_len(data: &[u8]) -> Option<usize> {
    if data.len() < RTP_HEADER_SIZE {
        return None;
    }
    let csrc_count = (data[0] & 0x0F) as usize;
    let has_extension = (data[0] >> 4) & 0x01 != 0;
    let mut len = RTP_HEADER_SIZE + csrc_count * 4;
    if data.len() < len {
        return None;
    }
    if has_extension {
        if data.len() < len + 4 {
            return None;
        }
        let ext_words = u16::from_be_bytes([data[len + 2], data[len + 3]]) as usize;
        len += 4 + ext_words * 4;
        if data.len() < len {
            return None;
        }
    }
    Some(len)
}

/// Parsed RTP header, payload left as a slice reference by callers that only
/// need to inspect/rewrite header fields in place.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeaderView {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Parse just the fixed RTP header fields, ignoring CSRC/extension payload.
pub fn parse_header(data: &[u8]) -> Result<RtpHeaderView> {
    if data.len() < RTP_HEADER_SIZE {
        bail!("RTP packet too short: {} bytes", data.len());
    }
    let version = (data[0] >> 6) & 0x03;
    if version != 2 {
        bail!("unsupported RTP version: {}", version);
    }
    Ok(RtpHeaderView {
        marker: (data[1] >> 7) & 0x01 != 0,
        payload_type: data[1] & 0x7F,
        sequence_number: u16::from_be_bytes([data[2], data[3]]),
        timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
    })
}

/// Overwrite the SSRC field of an RTP packet in place.
pub fn rewrite_ssrc(data: &mut [u8], ssrc: u32) {
    if data.len() >= RTP_HEADER_SIZE {
        data[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }
}

/// Overwrite the timestamp field of an RTP packet in place.
pub fn rewrite_timestamp(data: &mut [u8], timestamp: u32) {
    if data.len() >= RTP_HEADER_SIZE {
        data[4..8].copy_from_slice(&timestamp.to_be_bytes());
    }
}

/// Overwrite the sequence number field of an RTP packet in place.
pub fn rewrite_sequence(data: &mut [u8], seq: u16) {
    if data.len() >= RTP_HEADER_SIZE {
        data[2..4].copy_from_slice(&seq.to_be_bytes());
    }
}

/// Per-stream RTP rewriting state (the "switching context", §9 glossary).
///
/// Maintains a continuous sequence/timestamp space for the host-facing side
/// of the relay across peer source changes (re-INVITE, codec switch): the
/// peer's own sequence numbers and timestamps keep incrementing from
/// wherever they last left off, rather than resetting to the peer's raw
/// values every time the remote endpoint changes.
#[derive(Debug, Clone, Default)]
pub struct SwitchingContext {
    base_seq: u16,
    last_peer_seq: Option<u16>,
    out_seq: u16,

    base_timestamp: u32,
    last_peer_timestamp: Option<u32>,
    out_timestamp: u32,
    step_hint: u32,
}

impl SwitchingContext {
    pub fn new(step_hint: u32) -> Self {
        SwitchingContext {
            step_hint,
            ..Default::default()
        }
    }

    /// Rewrite a peer-sourced RTP header in place into the outbound space,
    /// advancing the local sequence/timestamp counters.
    pub fn rewrite_outbound(&mut self, data: &mut [u8], header: RtpHeaderView) {
        match self.last_peer_seq {
            None => {
                self.base_seq = header.sequence_number;
                self.out_seq = self.out_seq.wrapping_add(1);
            }
            Some(prev) => {
                let delta = header.sequence_number.wrapping_sub(prev);
                self.out_seq = self.out_seq.wrapping_add(delta);
            }
        }
        self.last_peer_seq = Some(header.sequence_number);

        match self.last_peer_timestamp {
            None => {
                self.base_timestamp = header.timestamp;
                self.out_timestamp = self.out_timestamp.wrapping_add(self.step_hint);
            }
            Some(prev) => {
                let delta = header.timestamp.wrapping_sub(prev);
                let delta = if delta == 0 { self.step_hint } else { delta };
                self.out_timestamp = self.out_timestamp.wrapping_add(delta);
            }
        }
        self.last_peer_timestamp = Some(header.timestamp);

        rewrite_sequence(data, self.out_seq);
        rewrite_timestamp(data, self.out_timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(seq: u16, ts: u32, ssrc: u32) -> Vec<u8> {
        let mut buf = vec![0x80, 0x00];
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_fixed_header() {
        let data = make_header(42, 16000, 0xDEADBEEF);
        let h = parse_header(&data).unwrap();
        assert_eq!(h.sequence_number, 42);
        assert_eq!(h.timestamp, 16000);
        assert_eq!(h.ssrc, 0xDEADBEEF);
    }

    #[test]
    fn rejects_short_packet() {
        assert!(parse_header(&[0x80, 0x00]).is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut data = make_header(1, 1, 1);
        data[0] = 0x00;
        assert!(parse_header(&data).is_err());
    }

    #[test]
    fn full_header_len_accounts_for_csrc() {
        let mut data = vec![0x81, 0x00]; // CC=1
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes()); // one CSRC
        assert_eq!(full_header_len(&data), Some(16));
    }

    #[test]
    fn switching_context_advances_monotonically_across_source_change() {
        let mut ctx = SwitchingContext::new(160);
        let mut p1 = make_header(100, 8000, 0xAAAA);
        let h1 = parse_header(&p1).unwrap();
        ctx.rewrite_outbound(&mut p1, h1);
        let out1 = parse_header(&p1).unwrap();

        // New source: peer sequence/timestamp reset to small values, but the
        // rewritten outbound stream must keep climbing.
        let mut p2 = make_header(5, 200, 0xBBBB);
        let h2 = parse_header(&p2).unwrap();
        ctx.rewrite_outbound(&mut p2, h2);
        let out2 = parse_header(&p2).unwrap();

        assert!(out2.sequence_number.wrapping_sub(out1.sequence_number) < 0x8000);
        assert_ne!(out1.sequence_number, 100);
    }

    #[test]
    fn switching_context_falls_back_to_step_hint_on_zero_delta() {
        let mut ctx = SwitchingContext::new(960);
        let mut p1 = make_header(1, 1000, 1);
        let h1 = parse_header(&p1).unwrap();
        ctx.rewrite_outbound(&mut p1, h1);
        let out1 = parse_header(&p1).unwrap();

        let mut p2 = make_header(2, 1000, 1); // identical timestamp (unusual but possible)
        let h2 = parse_header(&p2).unwrap();
        ctx.rewrite_outbound(&mut p2, h2);
        let out2 = parse_header(&p2).unwrap();

        assert_eq!(out2.timestamp.wrapping_sub(out1.timestamp), 960);
    }
}
