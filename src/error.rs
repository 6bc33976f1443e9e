//! Error kinds of the voice session.
//!
//! `CaptureUnavailable`, `PlaybackUnavailable` and `TransportOpenFailed` abort a start attempt.
//! `TransportError` ends a running session, as do the two device kinds when a device thread
//! dies mid-session. `SendFailed` and `PlaybackDecodeFailed` are
//! recovered where they happen and only logged.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// Microphone permission denied or no capture device.
    #[error("microphone unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("audio output unavailable: {0}")]
    PlaybackUnavailable(String),

    /// The remote session could not be established.
    #[error("could not open voice session: {0}")]
    TransportOpenFailed(String),

    /// The remote session failed or closed after opening.
    #[error("voice session error: {0}")]
    TransportError(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("malformed audio payload: {0}")]
    PlaybackDecodeFailed(String),

    #[error("a voice session is already running")]
    AlreadyActive,

    #[error("start cancelled by stop")]
    StartCancelled,

    #[error("voice service has shut down")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_keeps_device_message() {
        let err = VoiceError::CaptureUnavailable("Permission denied".into());
        assert_eq!(err.to_string(), "microphone unavailable: Permission denied");
    }

    #[test]
    fn test_display_text_for_session_failures() {
        assert_eq!(
            VoiceError::TransportError("reset".into()).to_string(),
            "voice session error: reset"
        );
        assert_eq!(
            VoiceError::PlaybackDecodeFailed("odd length".into()).to_string(),
            "malformed audio payload: odd length"
        );
    }
}
