//! nosip-bridge: a signalling-agnostic media bridge between a WebRTC host
//! gateway and a plain RTP/SDES-SRTP peer.
//!
//! This crate implements only the per-session media pipeline — the SDP
//! rewriter, the SDES-SRTP negotiator, the RTP/RTCP relay, and the session
//! state machine that coordinates them. Call signalling, ICE/DTLS
//! termination, configuration file discovery and the host gateway itself are
//! the caller's responsibility; see [`plugin::Plugin`] for the narrow
//! surface this crate expects to be driven through.

pub mod calling;
pub mod config;
pub mod error;
pub mod plugin;

pub use plugin::Plugin;
