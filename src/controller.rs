//! The audio session manager: one realtime voice conversation at a time.
//!
//! State machine: `Idle → Connecting → Active → Closing → Idle`, with `Errored` reachable from
//! `Connecting`/`Active` and falling back to `Idle` once everything is released.
//!
//! All session inputs (capture frames, remote messages, playback completions) arrive on one
//! per-session channel and are handled on a single task, so the scheduling cursor, the
//! scheduled-buffer set and the last-sent plan text need no locking.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::audio::device::{AudioBackend, BufferId, CaptureSpec, CaptureStream};
use crate::audio::scheduler::PlaybackScheduler;
use crate::config::SessionSettings;
use crate::context::{self, ContextSnapshotSource};
use crate::error::{Result, VoiceError};
use crate::net_link::{RemoteConversationEndpoint, SessionLink};
use crate::protocol::{AudioFrame, InboundEvent};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Errored,
}

/// Everything a running session can be told, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// Normalized microphone samples from one hardware callback.
    CaptureFrame(Vec<f32>),
    Remote(InboundEvent),
    /// A scheduled buffer played to the end.
    PlaybackEnded(BufferId),
    /// A capture or playback thread stopped for good.
    DeviceFailed(VoiceError),
}

/// Readout for the UI.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceStatus {
    pub state: SessionState,
    pub is_active: bool,
    pub is_connecting: bool,
    pub is_speaking: bool,
    pub scheduled_buffers: usize,
    pub error: Option<String>,
}

impl VoiceStatus {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            is_active: false,
            is_connecting: false,
            is_speaking: false,
            scheduled_buffers: 0,
            error: None,
        }
    }
}

/// Result of a handled event that the owner of a pending `start()` cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The remote side confirmed the session; state is now `Active`.
    Opened,
    /// The session ended with an error and has been torn down.
    Failed(VoiceError),
}

/// Resources owned for the lifetime of one session.
struct LiveSession {
    events: mpsc::Receiver<SessionEvent>,
    capture: Box<dyn CaptureStream>,
    playback: PlaybackScheduler,
    link: Box<dyn SessionLink>,
    last_sent_plan: Option<String>,
}

pub struct AudioSessionManager {
    settings: SessionSettings,
    backend: Box<dyn AudioBackend>,
    endpoint: Arc<dyn RemoteConversationEndpoint>,
    context: Arc<dyn ContextSnapshotSource>,
    state: SessionState,
    session: Option<LiveSession>,
    last_error: Option<VoiceError>,
    status_tx: watch::Sender<VoiceStatus>,
}

impl AudioSessionManager {
    pub fn new(
        settings: SessionSettings,
        backend: Box<dyn AudioBackend>,
        endpoint: Arc<dyn RemoteConversationEndpoint>,
        context: Arc<dyn ContextSnapshotSource>,
    ) -> Self {
        let (status_tx, _) = watch::channel(VoiceStatus::idle());
        Self {
            settings,
            backend,
            endpoint,
            context,
            state: SessionState::Idle,
            session: None,
            last_error: None,
            status_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> VoiceStatus {
        let playback = self.session.as_ref().map(|s| &s.playback);
        let scheduled_buffers = playback.map(|p| p.scheduled_len()).unwrap_or(0);
        VoiceStatus {
            state: self.state,
            is_active: self.state == SessionState::Active,
            is_connecting: self.state == SessionState::Connecting,
            is_speaking: playback.is_some_and(|p| p.is_speaking()),
            scheduled_buffers,
            error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Scheduling cursor of the live session, if any.
    pub fn next_start_time(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.playback.next_start_time())
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    /// Open microphone, output device and remote session.
    ///
    /// On success the manager is `Connecting`; it becomes `Active` when the remote side sends
    /// `opened`. On failure everything opened so far is released and the state stays `Idle`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(VoiceError::AlreadyActive);
        }
        self.last_error = None;

        match self.open_session() {
            Ok(session) => {
                self.session = Some(session);
                self.state = SessionState::Connecting;
                log::info!("Voice session connecting");
                self.publish();
                Ok(())
            }
            Err(e) => {
                log::error!("Voice session start failed: {}", e);
                self.last_error = Some(e.clone());
                self.publish();
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<LiveSession> {
        let (tx, rx) = mpsc::channel(self.settings.event_capacity);

        let spec = CaptureSpec {
            sample_rate: self.settings.input_sample_rate,
            frame_samples: self.settings.capture_frame_samples,
        };
        let mut capture = self.backend.open_capture(spec, tx.clone())?;

        let sink = match self
            .backend
            .open_playback(self.settings.output_sample_rate, tx.clone())
        {
            Ok(sink) => sink,
            Err(e) => {
                close_logged("capture", capture.close());
                return Err(e);
            }
        };
        let mut playback = PlaybackScheduler::new(sink, self.settings.output_sample_rate);

        let link = match self.endpoint.connect(tx) {
            Ok(link) => link,
            Err(e) => {
                close_logged("capture", capture.close());
                close_logged("playback", playback.close());
                return Err(match e {
                    VoiceError::TransportOpenFailed(_) => e,
                    other => VoiceError::TransportOpenFailed(other.to_string()),
                });
            }
        };

        Ok(LiveSession {
            events: rx,
            capture,
            playback,
            link,
            last_sent_plan: None,
        })
    }

    /// Wait for the next event of the live session. Pends forever while idle.
    ///
    /// A channel whose producers are all gone reads as the remote side closing.
    pub async fn next_event(&mut self) -> SessionEvent {
        match self.session.as_mut() {
            Some(session) => match session.events.recv().await {
                Some(event) => event,
                None => SessionEvent::Remote(InboundEvent::Closed),
            },
            None => std::future::pending().await,
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) -> Option<Transition> {
        let transition = match event {
            SessionEvent::CaptureFrame(samples) => {
                self.handle_capture_frame(&samples);
                None
            }
            SessionEvent::Remote(inbound) => self.handle_remote_event(inbound),
            SessionEvent::PlaybackEnded(id) => {
                self.handle_playback_ended(id);
                None
            }
            SessionEvent::DeviceFailed(error) => self.fail_session(error),
        };
        self.publish();
        transition
    }

    /// Encode one microphone frame and hand it to the link. Dropped unless `Active`.
    fn handle_capture_frame(&mut self, samples: &[f32]) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let frame = AudioFrame::from_samples(samples, self.settings.input_sample_rate);
        if let Err(e) = session.link.send_audio(frame) {
            log::warn!("Dropping capture frame: {}", e);
        }
    }

    fn handle_remote_event(&mut self, event: InboundEvent) -> Option<Transition> {
        match event {
            InboundEvent::Opened => {
                if self.state != SessionState::Connecting {
                    log::debug!("Ignoring opened in state {:?}", self.state);
                    return None;
                }
                self.state = SessionState::Active;
                log::info!("Voice session active");
                self.send_instruction();
                Some(Transition::Opened)
            }
            InboundEvent::Audio(frame) => {
                self.handle_inbound_audio(&frame);
                None
            }
            InboundEvent::Interrupted => {
                if self.state != SessionState::Active {
                    return None;
                }
                if let Some(session) = self.session.as_mut() {
                    let stopped = session.playback.interrupt();
                    log::info!("Interrupted: stopped {} scheduled buffers", stopped);
                }
                None
            }
            InboundEvent::Closed => self.fail_remote("session closed by remote".into()),
            InboundEvent::Error(message) => self.fail_remote(message),
        }
    }

    fn handle_inbound_audio(&mut self, frame: &AudioFrame) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if frame.sample_rate != self.settings.output_sample_rate {
            log::warn!(
                "Inbound frame declares {} Hz, playing at {} Hz",
                frame.sample_rate,
                self.settings.output_sample_rate
            );
        }
        let result = frame
            .decode()
            .and_then(|samples| session.playback.enqueue(samples));
        if let Err(e) = result {
            log::warn!("Skipping inbound audio frame: {}", e);
        }
    }

    fn handle_playback_ended(&mut self, id: BufferId) {
        if let Some(session) = self.session.as_mut() {
            if session.playback.finish(id) {
                log::info!("Assistant finished speaking");
            }
        }
    }

    fn fail_remote(&mut self, message: String) -> Option<Transition> {
        let error = match self.state {
            SessionState::Connecting => VoiceError::TransportOpenFailed(message),
            SessionState::Active => VoiceError::TransportError(message),
            _ => {
                log::debug!("Ignoring remote failure in state {:?}: {}", self.state, message);
                return None;
            }
        };
        self.fail_session(error)
    }

    /// Tear the live session down after a fatal error and keep the error for the readout.
    fn fail_session(&mut self, error: VoiceError) -> Option<Transition> {
        if !matches!(self.state, SessionState::Connecting | SessionState::Active) {
            log::debug!("Ignoring failure in state {:?}: {}", self.state, error);
            return None;
        }
        log::error!("Voice session failed: {}", error);
        self.state = SessionState::Errored;
        self.last_error = Some(error.clone());
        self.publish();

        self.teardown();
        self.state = SessionState::Idle;
        Some(Transition::Failed(error))
    }

    fn send_instruction(&mut self) {
        let snapshot = self.context.snapshot();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.last_sent_plan = snapshot.plan().map(str::to_string);
        let instruction = context::build_instruction(&snapshot);
        if let Err(e) = session.link.send_text(instruction) {
            log::warn!("Failed to send session instruction: {}", e);
        }
    }

    /// Push a plan update if the plan text changed since it was last sent.
    ///
    /// Returns true when an update was handed to the link.
    pub fn sync_context(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let snapshot = self.context.snapshot();
        let Some(plan) = snapshot.plan() else {
            return false;
        };
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.last_sent_plan.as_deref() == Some(plan) {
            return false;
        }

        session.last_sent_plan = Some(plan.to_string());
        log::info!("Lesson plan changed, notifying assistant");
        let message = context::plan_update_message(plan);
        match session.link.send_text(message) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to send plan update: {}", e);
                false
            }
        }
    }

    /// Release every session resource and return to `Idle`. Repeated calls are no-ops.
    pub fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Closing;
        self.teardown();
        self.state = SessionState::Idle;
        log::info!("Voice session stopped");
        self.publish();
    }

    /// Attempt every release even if an earlier one fails.
    fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        close_logged("capture", session.capture.close());
        close_logged("playback", session.playback.close());
        close_logged("link", session.link.close());
        session.events.close();
    }
}

impl Drop for AudioSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close_logged(what: &str, result: Result<()>) {
    if let Err(e) = result {
        log::warn!("Failed to close {}: {}", what, e);
    }
}
