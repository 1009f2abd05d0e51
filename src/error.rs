//! Control-plane error taxonomy (wire error codes for the NoSIP request/response schema).

use thiserror::Error;

/// Typed errors surfaced back to the host over the control-plane wire.
///
/// Each variant carries the source's own message text and maps to a stable
/// numeric code via [`NoSipError::code`]. Internal, non-protocol failures that
/// reach a request handler via `?` before being classified fall back to
/// [`NoSipError::Unknown`], keeping the originating [`anyhow::Error`] for logging.
#[derive(Debug, Error)]
pub enum NoSipError {
    #[error("Unknown error")]
    Unknown(#[source] anyhow::Error),

    #[error("No message provided")]
    NoMessage,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Invalid request")]
    InvalidRequest,

    #[error("Missing element ({0})")]
    MissingElement(String),

    #[error("Invalid element ({0})")]
    InvalidElement(String),

    #[error("Wrong state ({0})")]
    WrongState(String),

    #[error("{0}")]
    MissingSdp(String),

    #[error("Invalid SDP ({0})")]
    InvalidSdp(String),

    #[error("I/O error ({0})")]
    IoError(String),

    #[error("Recording error ({0})")]
    RecordingError(String),

    #[error("Too strict (SRTP is mandatory, but caller didn't offer it)")]
    TooStrict,
}

impl NoSipError {
    /// The numeric error code for the wire response (§6.3).
    pub fn code(&self) -> u32 {
        match self {
            NoSipError::Unknown(_) => 499,
            NoSipError::NoMessage => 440,
            NoSipError::InvalidJson => 441,
            NoSipError::InvalidRequest => 442,
            NoSipError::MissingElement(_) => 443,
            NoSipError::InvalidElement(_) => 444,
            NoSipError::WrongState(_) => 445,
            NoSipError::MissingSdp(_) => 446,
            NoSipError::InvalidSdp(_) => 447,
            NoSipError::IoError(_) => 448,
            NoSipError::RecordingError(_) => 449,
            NoSipError::TooStrict => 450,
        }
    }
}

impl From<anyhow::Error> for NoSipError {
    fn from(err: anyhow::Error) -> Self {
        NoSipError::Unknown(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_spec() {
        assert_eq!(NoSipError::Unknown(anyhow::anyhow!("x")).code(), 499);
        assert_eq!(NoSipError::NoMessage.code(), 440);
        assert_eq!(NoSipError::InvalidJson.code(), 441);
        assert_eq!(NoSipError::InvalidRequest.code(), 442);
        assert_eq!(NoSipError::MissingElement("x".into()).code(), 443);
        assert_eq!(NoSipError::InvalidElement("x".into()).code(), 444);
        assert_eq!(NoSipError::WrongState("x".into()).code(), 445);
        assert_eq!(NoSipError::MissingSdp("x".into()).code(), 446);
        assert_eq!(NoSipError::InvalidSdp("x".into()).code(), 447);
        assert_eq!(NoSipError::IoError("x".into()).code(), 448);
        assert_eq!(NoSipError::RecordingError("x".into()).code(), 449);
        assert_eq!(NoSipError::TooStrict.code(), 450);
    }

    #[test]
    fn anyhow_folds_into_unknown() {
        let e: NoSipError = anyhow::anyhow!("boom").into();
        assert_eq!(e.code(), 499);
    }
}
