//! ALSA implementation of [`AudioBackend`].
//!
//! Capture and playback each run on a dedicated std::thread (NOT tokio tasks) so real-time
//! I/O never competes with the async network side.

use tokio::runtime::RuntimeFlavor;
use tokio::sync::mpsc;

use super::device::{AudioBackend, CaptureSpec, CaptureStream, PlaybackSink};
use super::play::AlsaPlayback;
use super::record::AlsaCapture;
use crate::config::Config;
use crate::controller::SessionEvent;
use crate::error::{Result, VoiceError};

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    pub playback_device: String,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            playback_period_size: 480,
        }
    }
}

impl AudioConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.to_string(),
            playback_device: config.playback_device.to_string(),
            playback_period_size: config.playback_period_size,
        }
    }
}

/// Run a blocking wait (device open handshake, thread join) without stalling a tokio worker.
pub(super) fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

pub struct AlsaBackend {
    config: AudioConfig,
}

impl AlsaBackend {
    pub fn new(config: AudioConfig) -> Self {
        log::info!(
            "ALSA backend: capture \"{}\", playback \"{}\"",
            config.capture_device,
            config.playback_device
        );
        Self { config }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_capture(
        &mut self,
        spec: CaptureSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn CaptureStream>> {
        let capture = AlsaCapture::start(self.config.capture_device.clone(), spec, events)
            .map_err(|e| VoiceError::CaptureUnavailable(format!("{:#}", e)))?;
        Ok(Box::new(capture))
    }

    fn open_playback(
        &mut self,
        sample_rate: u32,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn PlaybackSink>> {
        let period_size = match self.config.playback_period_size {
            0 => None,
            n => Some(n),
        };
        let playback = AlsaPlayback::start(
            self.config.playback_device.clone(),
            sample_rate,
            period_size,
            events,
        )
        .map_err(|e| VoiceError::PlaybackUnavailable(format!("{:#}", e)))?;
        Ok(Box::new(playback))
    }
}
