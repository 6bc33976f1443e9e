//! Hardware seams used by the session manager.
//!
//! A backend opens one capture stream and one playback sink per session. Both report back
//! through the session's event channel; neither is touched outside the manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::controller::SessionEvent;
use crate::error::{Result, VoiceError};

/// Identity of one scheduled playback buffer.
pub type BufferId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    /// Samples per frame delivered as `SessionEvent::CaptureFrame`.
    pub frame_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub id: BufferId,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl PlaybackBuffer {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Open microphone stream. Frames flow into the session channel until closed.
pub trait CaptureStream: Send {
    fn close(&mut self) -> Result<()>;
}

/// Output device with its own clock.
///
/// `now()` is seconds since the sink was opened. A scheduled buffer starts at `start_at`
/// (or immediately if that is already past) and reports `SessionEvent::PlaybackEnded`
/// when it finishes. Buffers removed with `stop` are not reported.
pub trait PlaybackSink: Send {
    fn now(&self) -> f64;
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<()>;
    fn stop(&mut self, id: BufferId);
    fn close(&mut self) -> Result<()>;
}

pub trait AudioBackend: Send {
    /// Fails with `CaptureUnavailable` when there is no device or access is denied.
    fn open_capture(
        &mut self,
        spec: CaptureSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn CaptureStream>>;

    /// Fails with `PlaybackUnavailable` when the output device cannot be opened.
    fn open_playback(
        &mut self,
        sample_rate: u32,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn PlaybackSink>>;
}

/// Tell the session a device thread is gone for good.
///
/// Retries while the session channel is full. Gives up once the channel is closed or `running`
/// is cleared, since the owner is then already joining the thread.
pub fn report_device_failure(
    events: &mpsc::Sender<SessionEvent>,
    running: &AtomicBool,
    error: VoiceError,
) {
    let mut event = SessionEvent::DeviceFailed(error);
    while running.load(Ordering::Relaxed) {
        match events.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                event = back;
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_failure_waits_for_room_in_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(SessionEvent::PlaybackEnded(1)).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let reporter = {
            let running = running.clone();
            std::thread::spawn(move || {
                report_device_failure(
                    &tx,
                    &running,
                    VoiceError::PlaybackUnavailable("device unplugged".into()),
                )
            })
        };

        assert!(matches!(rx.blocking_recv(), Some(SessionEvent::PlaybackEnded(1))));
        match rx.blocking_recv() {
            Some(SessionEvent::DeviceFailed(err)) => {
                assert_eq!(err, VoiceError::PlaybackUnavailable("device unplugged".into()))
            }
            other => panic!("unexpected {:?}", other),
        }
        reporter.join().unwrap();
    }

    #[test]
    fn test_failure_is_dropped_while_shutting_down() {
        let (tx, mut rx) = mpsc::channel(1);
        let running = AtomicBool::new(false);
        report_device_failure(&tx, &running, VoiceError::CaptureUnavailable("gone".into()));
        assert!(rx.try_recv().is_err());
    }
}
