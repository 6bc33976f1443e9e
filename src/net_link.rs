use crate::config::Config;
use crate::controller::SessionEvent;
use crate::error::{Result, VoiceError};
use crate::protocol::{self, AudioFrame, InboundEvent, OutboundMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

/// Duplex session with a remote speech-to-speech model.
///
/// Sends never block: a message that cannot be queued is reported as `SendFailed`.
pub trait SessionLink: Send {
    fn send(&mut self, msg: OutboundMessage) -> Result<()>;

    /// Stop the session. Safe to call repeatedly.
    fn close(&mut self) -> Result<()>;

    fn send_audio(&mut self, frame: AudioFrame) -> Result<()> {
        self.send(OutboundMessage::AudioFrame(frame))
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        self.send(OutboundMessage::TextEvent(text))
    }
}

/// Opens sessions. Inbound messages and lifecycle (`opened`, `closed`, `error`) are delivered
/// as `SessionEvent::Remote` on `events`.
pub trait RemoteConversationEndpoint: Send + Sync {
    fn connect(&self, events: mpsc::Sender<SessionEvent>) -> Result<Box<dyn SessionLink>>;
}

#[derive(Debug)]
enum LinkCommand {
    Send(OutboundMessage),
    Close,
}

/// Websocket endpoint; one link task per session.
#[derive(Debug, Clone)]
pub struct WsEndpoint {
    url: String,
    token: String,
    client_id: String,
    send_capacity: usize,
}

impl WsEndpoint {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        client_id: impl Into<String>,
        send_capacity: usize,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            client_id: client_id.into(),
            send_capacity,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ws_url,
            config.ws_token,
            config.client_id.clone(),
            config.send_capacity,
        )
    }
}

impl RemoteConversationEndpoint for WsEndpoint {
    fn connect(&self, events: mpsc::Sender<SessionEvent>) -> Result<Box<dyn SessionLink>> {
        let url = Url::parse(&self.url)
            .map_err(|e| VoiceError::TransportOpenFailed(format!("invalid url {}: {}", self.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(VoiceError::TransportOpenFailed(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let (tx_cmd, rx_cmd) = mpsc::channel(self.send_capacity.max(1));
        let net_link = NetLink {
            url,
            token: self.token.clone(),
            client_id: self.client_id.clone(),
            events,
            rx_cmd,
        };
        let task = tokio::spawn(net_link.run());

        Ok(Box::new(WsLink {
            tx_cmd: Some(tx_cmd),
            task: Some(task),
        }))
    }
}

struct WsLink {
    tx_cmd: Option<mpsc::Sender<LinkCommand>>,
    task: Option<JoinHandle<()>>,
}

impl SessionLink for WsLink {
    fn send(&mut self, msg: OutboundMessage) -> Result<()> {
        let tx = self
            .tx_cmd
            .as_ref()
            .ok_or_else(|| VoiceError::SendFailed("link closed".into()))?;
        tx.try_send(LinkCommand::Send(msg)).map_err(|e| match e {
            TrySendError::Full(_) => VoiceError::SendFailed("send queue full".into()),
            TrySendError::Closed(_) => VoiceError::SendFailed("link task ended".into()),
        })
    }

    fn close(&mut self) -> Result<()> {
        let Some(tx) = self.tx_cmd.take() else {
            return Ok(());
        };
        let task = self.task.take();
        // 队列满时无法排队 Close，直接终止任务
        if tx.try_send(LinkCommand::Close).is_err() {
            if let Some(task) = task {
                task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct NetLink {
    url: Url,
    token: String,
    client_id: String,
    events: mpsc::Sender<SessionEvent>,
    rx_cmd: mpsc::Receiver<LinkCommand>,
}

impl NetLink {
    async fn run(mut self) {
        if let Err(e) = self.connect_and_loop().await {
            log::error!("Voice link error: {}", e);
            let _ = self
                .events
                .send(SessionEvent::Remote(InboundEvent::Error(e.to_string())))
                .await;
        }
        log::info!("Voice link task finished");
    }

    async fn emit(&self, event: InboundEvent) -> bool {
        self.events.send(SessionEvent::Remote(event)).await.is_ok()
    }

    // 建立连接并进入主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.token))?,
        );
        headers.insert("client-id", HeaderValue::from_str(&self.client_id)?);
        headers.insert("protocol-version", HeaderValue::from_static("1"));

        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("Connected, waiting for session to open");

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match protocol::parse_server_text(text.as_str()) {
                                Ok(Some(event)) => {
                                    if !self.emit(event).await {
                                        // 会话已结束，没有接收方
                                        return Ok(());
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => log::warn!("Ignoring malformed message: {}", e),
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            log::debug!("Ignoring {} byte binary message", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            self.emit(InboundEvent::Closed).await;
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            self.emit(InboundEvent::Closed).await;
                            return Ok(());
                        }
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(LinkCommand::Send(msg)) => {
                            let text = serde_json::to_string(&msg)?;
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                log::warn!("Send failed, dropping message: {}", e);
                            }
                        }
                        Some(LinkCommand::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            log::info!("Voice link closed locally");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
