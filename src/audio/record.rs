use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device;
use super::audio_system::off_runtime;
use super::device::{CaptureSpec, CaptureStream, report_device_failure};
use crate::controller::SessionEvent;
use crate::error::VoiceError;

/// Microphone capture running on its own OS thread.
pub struct AlsaCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaCapture {
    /// Open the device and start delivering `CaptureFrame`s.
    ///
    /// Returns once the device is open, so a missing or busy microphone fails here.
    pub fn start(
        device: String,
        spec: CaptureSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("voice-record".into())
                .spawn(move || {
                    let failures = events.clone();
                    if let Err(e) = record_thread(&device, spec, events, &running, ready_tx) {
                        log::error!("Recording thread error: {:#}", e);
                        report_device_failure(
                            &failures,
                            &running,
                            VoiceError::CaptureUnavailable(format!("{:#}", e)),
                        );
                    }
                })?
        };

        match off_runtime(|| ready_rx.recv()) {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(anyhow!("recording thread exited before opening the device"))
            }
        }
    }
}

impl CaptureStream for AlsaCapture {
    fn close(&mut self) -> crate::error::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = off_runtime(|| h.join());
        }
        Ok(())
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn record_thread(
    device: &str,
    spec: CaptureSpec,
    events: mpsc::Sender<SessionEvent>,
    running: &AtomicBool,
    ready: std_mpsc::SyncSender<Result<()>>,
) -> Result<()> {
    let (pcm, params) = match alsa_device::open_capture(device, spec.sample_rate) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    let io = match pcm.io_f32() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return Ok(());
        }
    };
    let _ = ready.send(Ok(()));

    let frame_samples = spec.frame_samples.max(1);
    let mut read_buf = vec![0f32; params.period_size.max(1)];
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    log::info!(
        "Recording started: rate={}, period={}, frame_samples={}",
        params.sample_rate,
        params.period_size,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                accum_buf.extend_from_slice(&read_buf[..frames]);

                while accum_buf.len() >= frame_samples {
                    let frame: Vec<f32> = accum_buf.drain(..frame_samples).collect();
                    match events.try_send(SessionEvent::CaptureFrame(frame)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            log::warn!("Session busy, dropping capture frame");
                        }
                        Err(TrySendError::Closed(_)) => {
                            log::info!("Session channel closed, recording ends");
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    return Err(anyhow!("failed to recover PCM capture: {}", e2));
                }
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}
