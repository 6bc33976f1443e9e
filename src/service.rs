//! Async front for [`AudioSessionManager`].
//!
//! The manager runs on one spawned task. Callers hold a cloneable [`VoiceHandle`] and talk
//! to it over a command channel; `start()` resolves only once the remote session has
//! opened (or failed).

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::controller::{AudioSessionManager, SessionState, Transition, VoiceStatus};
use crate::error::{Result, VoiceError};

type Reply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
enum Command {
    Start(Reply),
    Stop(Reply),
    Toggle(Reply),
    ContextChanged,
}

#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<VoiceStatus>,
}

impl VoiceHandle {
    /// Start a session and wait until it is `Active`.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Stop the session, if any. Never fails while the service is running.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Start when idle, otherwise stop.
    pub async fn toggle(&self) -> Result<()> {
        self.request(Command::Toggle).await
    }

    /// Ask for an immediate plan comparison instead of waiting for the next poll.
    pub fn notify_context_changed(&self) {
        if let Err(e) = self.commands.try_send(Command::ContextChanged) {
            log::debug!("Context notification dropped: {}", e);
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceStatus> {
        self.status.clone()
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| VoiceError::ServiceClosed)?;
        rx.await.map_err(|_| VoiceError::ServiceClosed)?
    }
}

pub struct VoiceService {
    manager: AudioSessionManager,
    commands: mpsc::Receiver<Command>,
    pending_start: Option<Reply>,
    context_poll: Duration,
}

impl VoiceService {
    /// Move the manager onto its own task. The task ends when every handle is dropped.
    pub fn spawn(manager: AudioSessionManager, context_poll: Duration) -> VoiceHandle {
        let (tx, rx) = mpsc::channel(32);
        let status = manager.subscribe();
        let service = Self {
            manager,
            commands: rx,
            pending_start: None,
            context_poll,
        };
        tokio::spawn(service.run());
        VoiceHandle {
            commands: tx,
            status,
        }
    }

    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.context_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                event = self.manager.next_event() => {
                    if let Some(transition) = self.manager.handle_event(event) {
                        self.resolve_start(transition);
                    }
                }
                _ = poll.tick() => {
                    self.manager.sync_context();
                }
            }
        }

        self.manager.stop();
        self.cancel_pending_start();
        log::info!("Voice service stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => self.begin_start(reply),
            Command::Stop(reply) => {
                self.stop_session();
                let _ = reply.send(Ok(()));
            }
            Command::Toggle(reply) => {
                if self.manager.state() == SessionState::Idle && self.pending_start.is_none() {
                    self.begin_start(reply);
                } else {
                    self.stop_session();
                    let _ = reply.send(Ok(()));
                }
            }
            Command::ContextChanged => {
                self.manager.sync_context();
            }
        }
    }

    fn begin_start(&mut self, reply: Reply) {
        if self.pending_start.is_some() || self.manager.state() != SessionState::Idle {
            let _ = reply.send(Err(VoiceError::AlreadyActive));
            return;
        }
        match self.manager.start() {
            Ok(()) => self.pending_start = Some(reply),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn stop_session(&mut self) {
        self.manager.stop();
        self.cancel_pending_start();
    }

    fn resolve_start(&mut self, transition: Transition) {
        let Some(reply) = self.pending_start.take() else {
            return;
        };
        let result = match transition {
            Transition::Opened => Ok(()),
            Transition::Failed(e) => Err(e),
        };
        let _ = reply.send(result);
    }

    fn cancel_pending_start(&mut self) {
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(VoiceError::StartCancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::config::SessionSettings;
    use crate::context::{LessonContext, SharedContext};
    use crate::protocol::InboundEvent;
    use crate::test_support::{FakeBackend, FakeEndpoint};

    struct Harness {
        handle: VoiceHandle,
        backend: FakeBackend,
        endpoint: FakeEndpoint,
        context: SharedContext,
    }

    fn spawn_service() -> Harness {
        let backend = FakeBackend::new();
        let endpoint = FakeEndpoint::new();
        let context = SharedContext::new(LessonContext {
            topic: "Photosynthesis".into(),
            ..Default::default()
        });
        let manager = AudioSessionManager::new(
            SessionSettings::default(),
            Box::new(backend.clone()),
            Arc::new(endpoint.clone()),
            Arc::new(context.clone()),
        );
        // long poll so tests drive context sync explicitly
        let handle = VoiceService::spawn(manager, Duration::from_secs(3600));
        Harness {
            handle,
            backend,
            endpoint,
            context,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !cond() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn open(h: &Harness) {
        let before = h.endpoint.connects();
        let handle = h.handle.clone();
        let pending = tokio::spawn(async move { handle.start().await });
        wait_for(|| h.endpoint.connects() == before + 1).await;
        h.endpoint.emit(InboundEvent::Opened);
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_start_resolves_after_remote_opens() {
        let h = spawn_service();
        open(&h).await;

        let status = h.handle.status();
        assert_eq!(status.state, SessionState::Active);
        assert!(status.is_active);
        assert_eq!(h.endpoint.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_error_while_connecting_fails_start() {
        let h = spawn_service();
        let handle = h.handle.clone();
        let pending = tokio::spawn(async move { handle.start().await });

        wait_for(|| h.endpoint.connects() == 1).await;
        h.endpoint.emit(InboundEvent::Error("handshake rejected".into()));

        let result = pending.await.unwrap();
        assert_eq!(
            result,
            Err(VoiceError::TransportOpenFailed("handshake rejected".into()))
        );
        assert_eq!(h.handle.status().state, SessionState::Idle);
        assert_eq!(h.backend.capture_closes(), 1);
    }

    #[tokio::test]
    async fn test_stop_while_connecting_cancels_start() {
        let h = spawn_service();
        let handle = h.handle.clone();
        let pending = tokio::spawn(async move { handle.start().await });

        wait_for(|| h.endpoint.connects() == 1).await;
        h.handle.stop().await.unwrap();

        assert_eq!(pending.await.unwrap(), Err(VoiceError::StartCancelled));
        assert_eq!(h.endpoint.link_closes(), 1);
        assert_eq!(h.handle.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = spawn_service();
        open(&h).await;
        assert_eq!(h.handle.start().await, Err(VoiceError::AlreadyActive));
        assert_eq!(h.endpoint.connects(), 1);
    }

    #[tokio::test]
    async fn test_toggle_stops_an_active_session() {
        let h = spawn_service();
        open(&h).await;

        h.handle.toggle().await.unwrap();
        assert_eq!(h.handle.status().state, SessionState::Idle);
        assert_eq!(h.backend.sink().close_count(), 1);

        // stopping again is harmless
        h.handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_context_notification_sends_plan_update() {
        let h = spawn_service();
        open(&h).await;

        h.context.set_plan("## Lesson\nLeaf experiment");
        h.handle.notify_context_changed();
        wait_for(|| h.endpoint.sent_texts().len() == 2).await;
        assert!(h.endpoint.sent_texts()[1].contains("Leaf experiment"));

        // same plan again produces nothing new
        h.handle.notify_context_changed();
        h.handle.stop().await.unwrap();
        assert_eq!(h.endpoint.sent_texts().len(), 2);
    }

    #[tokio::test]
    async fn test_device_failure_reaches_status_readout() {
        let h = spawn_service();
        open(&h).await;
        let mut rx = h.handle.subscribe();

        h.backend
            .device_failed(VoiceError::PlaybackUnavailable("device unplugged".into()));
        let status = timeout(Duration::from_secs(5), rx.wait_for(|s| s.error.is_some()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(
            status.error.as_deref(),
            Some("audio output unavailable: device unplugged")
        );
        wait_for(|| h.handle.status().state == SessionState::Idle).await;
        assert_eq!(h.endpoint.link_closes(), 1);

        // a fresh start is allowed afterwards
        open(&h).await;
        assert_eq!(h.handle.status().error, None);
    }

    #[tokio::test]
    async fn test_status_subscription_sees_interruption() {
        let h = spawn_service();
        open(&h).await;
        let mut rx = h.handle.subscribe();

        let samples = vec![0.2; 2400];
        h.endpoint.emit(InboundEvent::Audio(crate::protocol::AudioFrame::from_samples(
            &samples, 24_000,
        )));
        timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_speaking))
            .await
            .unwrap()
            .unwrap();

        h.endpoint.emit(InboundEvent::Interrupted);
        timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_speaking))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.handle.status().state, SessionState::Active);
    }
}
