use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;

use super::alsa_device;
use super::audio_system::off_runtime;
use super::device::{BufferId, PlaybackBuffer, PlaybackSink, report_device_failure};
use super::pcm::float_to_pcm16;
use crate::controller::SessionEvent;
use crate::error::VoiceError;

const MAX_WRITE_RETRIES: usize = 3;

enum PlayCommand {
    Schedule {
        id: BufferId,
        start_frame: u64,
        samples: Vec<f32>,
    },
    Stop(BufferId),
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-accurate mix of everything scheduled on the output clock.
#[derive(Default)]
struct Timeline {
    voices: Vec<Voice>,
}

impl Timeline {
    /// The voice keeps its start frame. Frames already mixed are skipped, never shifted, so a
    /// late buffer cannot slide onto the one queued after it.
    fn schedule(&mut self, id: BufferId, start_frame: u64, samples: Vec<f32>) {
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    fn stop(&mut self, id: BufferId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fill `out` with the frames starting at `clock`. Returns the buffers that finished.
    fn mix(&mut self, clock: u64, out: &mut [f32]) -> Vec<BufferId> {
        out.fill(0.0);
        let period_end = clock + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(clock);
            let to = voice.end_frame().min(period_end);
            for frame in from..to {
                out[(frame - clock) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        let mut finished = Vec::new();
        self.voices.retain(|v| {
            if v.end_frame() <= period_end {
                finished.push(v.id);
                false
            } else {
                true
            }
        });
        finished
    }
}

/// Mix the next period and move the clock past it before the samples are written, so
/// `now()` is always the first frame not yet mixed.
fn render_period(timeline: &mut Timeline, clock: &AtomicU64, out: &mut [f32]) -> Vec<BufferId> {
    let start = clock.load(Ordering::Acquire);
    let finished = timeline.mix(start, out);
    clock.store(start + out.len() as u64, Ordering::Release);
    finished
}

/// Output device whose clock is the number of frames mixed for ALSA.
pub struct AlsaPlayback {
    sample_rate: u32,
    clock: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    cmd_tx: Option<std_mpsc::Sender<PlayCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaPlayback {
    pub fn start(
        device: String,
        sample_rate: u32,
        period_size: Option<usize>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let clock = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let handle = {
            let running = running.clone();
            let clock = clock.clone();
            thread::Builder::new()
                .name("voice-play".into())
                .spawn(move || {
                    let failures = events.clone();
                    let ctx = PlayThread {
                        device: &device,
                        sample_rate,
                        period_size,
                        events,
                        running: &running,
                        clock: &clock,
                    };
                    if let Err(e) = ctx.run(cmd_rx, ready_tx) {
                        log::error!("Playback thread error: {:#}", e);
                        report_device_failure(
                            &failures,
                            &running,
                            VoiceError::PlaybackUnavailable(format!("{:#}", e)),
                        );
                    }
                })?
        };

        match off_runtime(|| ready_rx.recv()) {
            Ok(Ok(())) => Ok(Self {
                sample_rate,
                clock,
                running,
                cmd_tx: Some(cmd_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(anyhow!("playback thread exited before opening the device"))
            }
        }
    }
}

impl PlaybackSink for AlsaPlayback {
    fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> crate::error::Result<()> {
        let tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| VoiceError::PlaybackUnavailable("playback closed".into()))?;
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        tx.send(PlayCommand::Schedule {
            id: buffer.id,
            start_frame,
            samples: buffer.samples,
        })
        .map_err(|_| VoiceError::PlaybackUnavailable("playback thread ended".into()))
    }

    fn stop(&mut self, id: BufferId) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(PlayCommand::Stop(id));
        }
    }

    fn close(&mut self) -> crate::error::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.cmd_tx.take();
        if let Some(h) = self.handle.take() {
            let _ = off_runtime(|| h.join());
        }
        Ok(())
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct PlayThread<'a> {
    device: &'a str,
    sample_rate: u32,
    period_size: Option<usize>,
    events: mpsc::Sender<SessionEvent>,
    running: &'a AtomicBool,
    clock: &'a AtomicU64,
}

impl PlayThread<'_> {
    fn run(
        &self,
        cmd_rx: std_mpsc::Receiver<PlayCommand>,
        ready: std_mpsc::SyncSender<Result<()>>,
    ) -> Result<()> {
        let (pcm, params) =
            match alsa_device::open_playback(self.device, self.sample_rate, self.period_size) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return Ok(());
                }
            };
        let io = match pcm.io_i16() {
            Ok(io) => io,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return Ok(());
            }
        };
        let _ = ready.send(Ok(()));

        let period = params.period_size.max(1);
        let mut timeline = Timeline::default();
        let mut mix_buf = vec![0f32; period];
        let mut out_buf = vec![0i16; period];
        // 完成通知在会话通道满时暂存，下个周期重试
        let mut unreported: Vec<BufferId> = Vec::new();

        log::info!("Playback started: rate={}, period={}", params.sample_rate, period);

        'outer: while self.running.load(Ordering::Relaxed) {
            loop {
                match cmd_rx.try_recv() {
                    Ok(PlayCommand::Schedule {
                        id,
                        start_frame,
                        samples,
                    }) => timeline.schedule(id, start_frame, samples),
                    Ok(PlayCommand::Stop(id)) => {
                        timeline.stop(id);
                        unreported.retain(|u| *u != id);
                    }
                    Err(std_mpsc::TryRecvError::Empty) => break,
                    Err(std_mpsc::TryRecvError::Disconnected) => break 'outer,
                }
            }

            unreported.extend(render_period(&mut timeline, self.clock, &mut mix_buf));
            for (out, sample) in out_buf.iter_mut().zip(&mix_buf) {
                *out = float_to_pcm16(*sample);
            }

            let mut frames_written = 0;
            let mut retries = 0;
            while frames_written < period {
                match io.writei(&out_buf[frames_written..]) {
                    Ok(n) => frames_written += n,
                    Err(e) => {
                        retries += 1;
                        log::warn!("ALSA playback error: {}, recovering...", e);
                        if retries > MAX_WRITE_RETRIES {
                            return Err(anyhow!("playback kept failing: {}", e));
                        }
                        if let Err(e2) = pcm.prepare() {
                            return Err(anyhow!("failed to recover PCM playback: {}", e2));
                        }
                    }
                }
            }

            while let Some(id) = unreported.first().copied() {
                match self.events.try_send(SessionEvent::PlaybackEnded(id)) {
                    Ok(()) => {
                        unreported.remove(0);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => break,
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        unreported.clear();
                        break;
                    }
                }
            }
        }

        log::info!("Playback stopped");
        Ok(())
    }
}
