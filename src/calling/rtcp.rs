//! RTCP demuxing and SSRC rewriting (RFC 3550).
//!
//! The relay doesn't generate its own RTCP reports — it forwards whatever
//! either side sends — but the host-to-peer path needs to fix up SSRCs
//! before a report leaves the bridge (§4.5): the outer "sender" SSRC has to
//! read as the host's own, and any report block naming a "this is who I'm
//! reporting on" target SSRC has to point at the peer's SSRC instead of
//! whatever the host believes its own is.

/// Minimum RTCP header size: V/P/RC(1) + PT(1) + length(2) + SSRC(4).
pub const RTCP_HEADER_SIZE: usize = 8;

/// RTCP packet types carrying a report-block target SSRC at byte offset 8
/// (RFC 3550 §12.1).
const PT_SR: u8 = 200;
const PT_RR: u8 = 201;

/// Demux RTP vs RTCP on the same socket/port pair.
///
/// RTCP packet types occupy 200-204 in byte[1]; RTP payload types are 0-127
/// (the top marker bit aside), so this is a safe discriminator in practice.
pub fn is_rtcp_packet(data: &[u8]) -> bool {
    data.len() >= RTCP_HEADER_SIZE && (200..=204).contains(&data[1])
}

/// The compound packet's first block's packet type, if parseable.
pub fn first_packet_type(data: &[u8]) -> Option<u8> {
    if data.len() < RTCP_HEADER_SIZE {
        return None;
    }
    Some(data[1])
}

/// The outer SSRC (sender/reporter) of the compound packet's first block.
pub fn sender_ssrc(data: &[u8]) -> Option<u32> {
    if data.len() < RTCP_HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([data[4], data[5], data[6], data[7]]))
}

/// Rewrite the outer sender SSRC, and — for SR/RR packets carrying at least
/// one report block — the first report block's target SSRC, in place.
///
/// `sender` replaces the outer SSRC (the host's own SSRC, once observed);
/// `target`, if given, replaces the first report block's "SSRC of the source
/// this block is about" field (set to the peer's SSRC, since that's who the
/// host is actually receiving from once the bridge is done rewriting).
pub fn fix_ssrc(data: &mut [u8], sender: u32, target: Option<u32>) {
    if data.len() < RTCP_HEADER_SIZE {
        return;
    }
    let report_count = data[0] & 0x1F;
    let pt = data[1];
    data[4..8].copy_from_slice(&sender.to_be_bytes());

    if let Some(target_ssrc) = target {
        if (pt == PT_SR || pt == PT_RR) && report_count > 0 {
            let block_offset = if pt == PT_SR {
                RTCP_HEADER_SIZE + 20
            } else {
                RTCP_HEADER_SIZE
            };
            if data.len() >= block_offset + 4 {
                data[block_offset..block_offset + 4].copy_from_slice(&target_ssrc.to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rr(sender: u32, target: u32) -> Vec<u8> {
        let mut buf = vec![0x81, PT_RR, 0, 7]; // RC=1
        buf.extend_from_slice(&sender.to_be_bytes());
        buf.extend_from_slice(&target.to_be_bytes());
        buf.extend_from_slice(&[0u8; 20]); // rest of report block
        buf
    }

    #[test]
    fn demuxes_rtcp_from_rtp() {
        let rr = make_rr(1, 2);
        assert!(is_rtcp_packet(&rr));
        let rtp = [0x80u8, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(!is_rtcp_packet(&rtp));
    }

    #[test]
    fn fix_ssrc_rewrites_sender_and_target() {
        let mut rr = make_rr(0xAAAA, 0xBBBB);
        fix_ssrc(&mut rr, 0x1111, Some(0x2222));
        assert_eq!(sender_ssrc(&rr), Some(0x1111));
        assert_eq!(
            u32::from_be_bytes([rr[8], rr[9], rr[10], rr[11]]),
            0x2222
        );
    }

    #[test]
    fn fix_ssrc_without_target_leaves_report_block() {
        let mut rr = make_rr(0xAAAA, 0xBBBB);
        fix_ssrc(&mut rr, 0x1111, None);
        assert_eq!(sender_ssrc(&rr), Some(0x1111));
        assert_eq!(
            u32::from_be_bytes([rr[8], rr[9], rr[10], rr[11]]),
            0xBBBB
        );
    }

    #[test]
    fn fix_ssrc_ignores_too_short_packet() {
        let mut short = vec![0u8; 4];
        fix_ssrc(&mut short, 1, Some(2));
        assert_eq!(short, vec![0u8; 4]);
    }
}
