//! Media recording: up to four file-sink recorders per session (§4.4).
//!
//! The on-disk format the recorder writes is out of scope (§1) — this module
//! only owns filename derivation, slot lifecycle, and where the bytes get
//! appended. A `Recorder` is a thin, append-only file sink tagged with the
//! codec name the session negotiated.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

/// One of the four recordable streams (§3: up to four recorders per session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderSlot {
    UserAudio,
    UserVideo,
    PeerAudio,
    PeerVideo,
}

impl RecorderSlot {
    fn label(self) -> &'static str {
        match self {
            RecorderSlot::UserAudio => "user-audio",
            RecorderSlot::UserVideo => "user-video",
            RecorderSlot::PeerAudio => "peer-audio",
            RecorderSlot::PeerVideo => "peer-video",
        }
    }
}

/// An open recording sink for one slot.
pub struct Recorder {
    pub path: PathBuf,
    pub codec: String,
    file: File,
}

impl Recorder {
    fn create(path: PathBuf, codec: String) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("failed to create recording file {}", path.display()))?;
        Ok(Recorder { path, codec, file })
    }

    /// Append a raw media packet to the sink.
    pub fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .with_context(|| format!("failed to write to recording file {}", self.path.display()))
    }
}

/// The up-to-four recorders a session can have open at once, held behind the
/// session's dedicated recorder mutex (§3, §4.4).
#[derive(Default)]
pub struct RecorderSet {
    pub user_audio: Option<Recorder>,
    pub user_video: Option<Recorder>,
    pub peer_audio: Option<Recorder>,
    pub peer_video: Option<Recorder>,
}

impl RecorderSet {
    fn slot_mut(&mut self, slot: RecorderSlot) -> &mut Option<Recorder> {
        match slot {
            RecorderSlot::UserAudio => &mut self.user_audio,
            RecorderSlot::UserVideo => &mut self.user_video,
            RecorderSlot::PeerAudio => &mut self.peer_audio,
            RecorderSlot::PeerVideo => &mut self.peer_video,
        }
    }

    pub fn get_mut(&mut self, slot: RecorderSlot) -> Option<&mut Recorder> {
        self.slot_mut(slot).as_mut()
    }
}

/// `start`/`stop` plus which of the four slots a `recording` request names (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingRequest {
    pub audio: bool,
    pub video: bool,
    pub peer_audio: bool,
    pub peer_video: bool,
    pub filename: Option<String>,
}

impl RecordingRequest {
    pub fn is_empty(&self) -> bool {
        !(self.audio || self.video || self.peer_audio || self.peer_video)
    }

    fn slots(&self) -> Vec<RecorderSlot> {
        let mut slots = Vec::with_capacity(4);
        if self.audio {
            slots.push(RecorderSlot::UserAudio);
        }
        if self.video {
            slots.push(RecorderSlot::UserVideo);
        }
        if self.peer_audio {
            slots.push(RecorderSlot::PeerAudio);
        }
        if self.peer_video {
            slots.push(RecorderSlot::PeerVideo);
        }
        slots
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `<base>-<slot-label>`, or an auto-generated name carrying the session
/// handle and the current epoch time when no explicit base was given (§4.4).
fn derive_filename(slot: RecorderSlot, session_handle: &str, filename_base: Option<&str>) -> PathBuf {
    let name = match filename_base {
        Some(base) => format!("{}-{}.raw", base, slot.label()),
        None => format!("nosip-{}-{}-{}.raw", session_handle, slot.label(), epoch_secs()),
    };
    PathBuf::from(name)
}

/// Start the requested recorder slots, using `codec_for` to resolve each
/// slot's negotiated codec name (only valid once a session has an answer).
/// Returns the slots actually started, so the caller (the Dispatcher) can
/// request a PLI upstream after opening `UserVideo`.
pub fn start(
    recorders: &mut RecorderSet,
    req: &RecordingRequest,
    session_handle: &str,
    codec_for: impl Fn(RecorderSlot) -> Option<String>,
) -> Result<Vec<RecorderSlot>> {
    let mut started = Vec::new();
    for slot in req.slots() {
        let codec = codec_for(slot).unwrap_or_else(|| "unknown".to_string());
        let path = derive_filename(slot, session_handle, req.filename.as_deref());
        let recorder = Recorder::create(path, codec)?;
        *recorders.slot_mut(slot) = Some(recorder);
        started.push(slot);
    }
    Ok(started)
}

/// Close and drop the requested recorder slots.
pub fn stop(recorders: &mut RecorderSet, req: &RecordingRequest) {
    for slot in req.slots() {
        *recorders.slot_mut(slot) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_explicit_base_filename() {
        let path = derive_filename(RecorderSlot::UserAudio, "handle-1", Some("call42"));
        assert_eq!(path, PathBuf::from("call42-user-audio.raw"));
    }

    #[test]
    fn derives_auto_filename_with_handle() {
        let path = derive_filename(RecorderSlot::PeerVideo, "handle-1", None);
        let s = path.to_string_lossy();
        assert!(s.starts_with("nosip-handle-1-peer-video-"));
    }

    #[test]
    fn start_opens_only_requested_slots() {
        let dir = std::env::temp_dir();
        let _cwd_guard = std::env::set_current_dir(&dir);

        let mut recorders = RecorderSet::default();
        let req = RecordingRequest {
            audio: true,
            video: true,
            ..Default::default()
        };
        let started = start(&mut recorders, &req, "h1", |_| Some("opus".to_string())).unwrap();

        assert_eq!(started.len(), 2);
        assert!(recorders.user_audio.is_some());
        assert!(recorders.user_video.is_some());
        assert!(recorders.peer_audio.is_none());

        stop(&mut recorders, &req);
        assert!(recorders.user_audio.is_none());
        assert!(recorders.user_video.is_none());
    }

    #[test]
    fn empty_request_is_rejected_by_is_empty() {
        let req = RecordingRequest::default();
        assert!(req.is_empty());
    }
}
