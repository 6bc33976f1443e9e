//! In-memory stand-ins for the audio devices and the remote endpoint.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::audio::device::{
    AudioBackend, BufferId, CaptureSpec, CaptureStream, PlaybackBuffer, PlaybackSink,
};
use crate::controller::SessionEvent;
use crate::error::{Result, VoiceError};
use crate::net_link::{RemoteConversationEndpoint, SessionLink};
use crate::protocol::{AudioFrame, InboundEvent, OutboundMessage};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Default)]
struct SinkState {
    now: f64,
    scheduled: Vec<(BufferId, f64, f64)>,
    stopped: Vec<BufferId>,
    close_count: usize,
}

/// Playback sink with a hand-driven clock.
#[derive(Clone, Default)]
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        lock(&self.state).now += seconds;
    }

    /// `(id, start, end)` of every buffer ever scheduled.
    pub fn scheduled(&self) -> Vec<(BufferId, f64, f64)> {
        lock(&self.state).scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        lock(&self.state).stopped.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }
}

impl PlaybackSink for FakeSink {
    fn now(&self) -> f64 {
        lock(&self.state).now
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        let end = start_at + buffer.duration();
        lock(&self.state).scheduled.push((buffer.id, start_at, end));
        Ok(())
    }

    fn stop(&mut self, id: BufferId) {
        lock(&self.state).stopped.push(id);
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.state).close_count += 1;
        Ok(())
    }
}

struct FakeCapture {
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl CaptureStream for FakeCapture {
    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    sink: FakeSink,
    capture_closes: Arc<AtomicUsize>,
    capture_error: Option<VoiceError>,
    playback_error: Option<VoiceError>,
    events: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_capture(mut self, err: VoiceError) -> Self {
        self.capture_error = Some(err);
        self
    }

    pub fn fail_playback(mut self, err: VoiceError) -> Self {
        self.playback_error = Some(err);
        self
    }

    pub fn sink(&self) -> FakeSink {
        self.sink.clone()
    }

    pub fn capture_closes(&self) -> usize {
        self.capture_closes.load(Ordering::SeqCst)
    }

    /// Report a dead device thread to the most recently opened session.
    pub fn device_failed(&self, err: VoiceError) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.try_send(SessionEvent::DeviceFailed(err));
        }
    }
}

impl AudioBackend for FakeBackend {
    fn open_capture(
        &mut self,
        _spec: CaptureSpec,
        _events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn CaptureStream>> {
        if let Some(err) = &self.capture_error {
            return Err(err.clone());
        }
        Ok(Box::new(FakeCapture {
            closes: self.capture_closes.clone(),
            closed: false,
        }))
    }

    fn open_playback(
        &mut self,
        _sample_rate: u32,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn PlaybackSink>> {
        if let Some(err) = &self.playback_error {
            return Err(err.clone());
        }
        *lock(&self.events) = Some(events);
        Ok(Box::new(self.sink.clone()))
    }
}

/// Endpoint that records everything sent and lets tests inject inbound events.
#[derive(Clone, Default)]
pub struct FakeEndpoint {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    events: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
    connects: Arc<AtomicUsize>,
    link_closes: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    connect_error: Option<VoiceError>,
}

impl FakeEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(mut self, err: VoiceError) -> Self {
        self.connect_error = Some(err);
        self
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn link_closes(&self) -> usize {
        self.link_closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::TextEvent(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn sent_audio(&self) -> Vec<AudioFrame> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::AudioFrame(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Deliver an inbound event to the most recently connected session.
    pub fn emit(&self, event: InboundEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.try_send(SessionEvent::Remote(event));
        }
    }
}

struct FakeLink {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    closes: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    closed: bool,
}

impl SessionLink for FakeLink {
    fn send(&mut self, msg: OutboundMessage) -> Result<()> {
        if self.closed || self.fail_sends.load(Ordering::SeqCst) {
            return Err(VoiceError::SendFailed("fake link refused".into()));
        }
        lock(&self.sent).push(msg);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl RemoteConversationEndpoint for FakeEndpoint {
    fn connect(&self, events: mpsc::Sender<SessionEvent>) -> Result<Box<dyn SessionLink>> {
        if let Some(err) = &self.connect_error {
            return Err(err.clone());
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.events) = Some(events);
        Ok(Box::new(FakeLink {
            sent: self.sent.clone(),
            closes: self.link_closes.clone(),
            fail_sends: self.fail_sends.clone(),
            closed: false,
        }))
    }
}
