use crate::config::Config;
use crate::controller::VoiceStatus;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoiceAction {
    Start,
    Stop,
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiEvent {
    Voice(VoiceAction),
    ContextChanged,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GuiMessage {
    Voice { action: VoiceAction },
    ContextChanged,
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    #[serde(flatten)]
    status: &'a VoiceStatus,
}

/// Parse one datagram from the UI process.
pub fn parse_gui_message(text: &str) -> serde_json::Result<GuiEvent> {
    Ok(match serde_json::from_str::<GuiMessage>(text)? {
        GuiMessage::Voice { action } => GuiEvent::Voice(action),
        GuiMessage::ContextChanged => GuiEvent::ContextChanged,
    })
}

/// `{"type":"voice_status", ...status fields}`
pub fn status_message(status: &VoiceStatus) -> serde_json::Result<String> {
    serde_json::to_string(&StatusMessage {
        msg_type: "voice_status",
        status,
    })
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.gui_local_ip, config.gui_local_port),
            format!("{}:{}", config.gui_remote_ip, config.gui_remote_port),
            config.gui_buffer_size,
            tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: String,
        buffer_size: usize,
        tx: mpsc::Sender<GuiEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size,
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Ignoring non-UTF-8 datagram from {}", from);
                continue;
            };
            match parse_gui_message(text) {
                Ok(event) => {
                    if self.tx.send(event).await.is_err() {
                        log::info!("GUI event receiver dropped, bridge exiting");
                        break;
                    }
                }
                Err(e) => log::warn!("Ignoring GUI message {:?}: {}", text, e),
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    pub async fn send_status(&self, status: &VoiceStatus) -> anyhow::Result<()> {
        let msg = status_message(status)?;
        self.send_message(&msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SessionState;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_parse_voice_actions() {
        assert_eq!(
            parse_gui_message(r#"{"type":"voice","action":"start"}"#).unwrap(),
            GuiEvent::Voice(VoiceAction::Start)
        );
        assert_eq!(
            parse_gui_message(r#"{"type":"voice","action":"toggle"}"#).unwrap(),
            GuiEvent::Voice(VoiceAction::Toggle)
        );
        assert_eq!(
            parse_gui_message(r#"{"type":"context_changed"}"#).unwrap(),
            GuiEvent::ContextChanged
        );
        assert!(parse_gui_message(r#"{"type":"voice","action":"mute"}"#).is_err());
        assert!(parse_gui_message(r#"{"type":"toast"}"#).is_err());
    }

    #[test]
    fn test_status_message_shape() {
        let status = VoiceStatus {
            state: SessionState::Active,
            is_active: true,
            is_connecting: false,
            is_speaking: true,
            scheduled_buffers: 2,
            error: None,
        };
        let v: Value = serde_json::from_str(&status_message(&status).unwrap()).unwrap();
        assert_eq!(v["type"], "voice_status");
        assert_eq!(v["state"], "active");
        assert_eq!(v["is_speaking"], true);
        assert_eq!(v["scheduled_buffers"], 2);
        assert!(v["error"].is_null());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ui_addr = ui.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let bridge = Arc::new(
            GuiBridge::bind("127.0.0.1:0", ui_addr.to_string(), 1024, tx)
                .await
                .unwrap(),
        );
        let bridge_addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        ui.send_to(b"not json", bridge_addr).await.unwrap();
        ui.send_to(br#"{"type":"voice","action":"stop"}"#, bridge_addr)
            .await
            .unwrap();
        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(GuiEvent::Voice(VoiceAction::Stop)));

        bridge.send_message(r#"{"type":"ping"}"#).await.unwrap();
        let mut buf = [0u8; 256];
        let (len, _) = timeout(Duration::from_secs(5), ui.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], br#"{"type":"ping"}"#);
    }
}
