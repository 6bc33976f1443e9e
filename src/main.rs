use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use lesson_voice_rs::audio::{AlsaBackend, AudioConfig};
use lesson_voice_rs::config::Config;
use lesson_voice_rs::context::FileContextSource;
use lesson_voice_rs::gui_bridge::{GuiBridge, GuiEvent, VoiceAction};
use lesson_voice_rs::net_link::WsEndpoint;
use lesson_voice_rs::{AudioSessionManager, VoiceHandle, VoiceService};
use tokio::signal;
use tokio::sync::mpsc;
use uuid::Uuid;

const UUID_FILE_PATH: &str = "lesson_voice_uuid.txt";

// 客户端UUID，先从本地文件读取以保持重启间身份一致，如果不存在则生成新的并保存
fn resolve_client_id(config: &mut Config) {
    if config.client_id != "unknown-client" {
        return;
    }
    if let Ok(content) = std::fs::read_to_string(UUID_FILE_PATH) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            config.client_id = trimmed.to_string();
            log::info!("Loaded Client ID from file: {}", config.client_id);
            return;
        }
    }

    config.client_id = Uuid::new_v4().to_string();
    log::info!("Generated new Client ID: {}", config.client_id);
    if let Err(e) = std::fs::write(UUID_FILE_PATH, &config.client_id) {
        log::warn!("Failed to save Client ID to file: {}", e);
    }
}

fn spawn_voice_request(handle: &VoiceHandle, action: VoiceAction) {
    let handle = handle.clone();
    // start 会等待远端打开会话，不阻塞主循环
    tokio::spawn(async move {
        let result = match action {
            VoiceAction::Start => handle.start().await,
            VoiceAction::Stop => handle.stop().await,
            VoiceAction::Toggle => handle.toggle().await,
        };
        if let Err(e) = result {
            log::warn!("Voice {:?} failed: {}", action, e);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config = Config::new().map_err(|e| anyhow!(e))?;
    resolve_client_id(&mut config);

    // GUI进程通道
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    let manager = AudioSessionManager::new(
        config.session_settings(),
        Box::new(AlsaBackend::new(AudioConfig::from_config(&config))),
        Arc::new(WsEndpoint::from_config(&config)),
        Arc::new(FileContextSource::new(config.context_file)),
    );
    let voice = VoiceService::spawn(manager, Duration::from_millis(config.context_poll_ms));

    // 会话状态变化转发给GUI
    let mut status_rx = voice.subscribe();
    let gui_status = gui_bridge.clone();
    tokio::spawn(async move {
        loop {
            let status = status_rx.borrow_and_update().clone();
            if let Err(e) = gui_status.send_status(&status).await {
                log::warn!("Failed to send status to GUI: {}", e);
            }
            if status_rx.changed().await.is_err() {
                break;
            }
        }
    });

    log::info!("{} {} started", env!("APP_NAME"), env!("APP_VERSION"));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                if let Err(e) = voice.stop().await {
                    log::warn!("Failed to stop voice session: {}", e);
                }
                break;
            }

            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Voice(action) => {
                        log::info!("GUI requested voice {:?}", action);
                        spawn_voice_request(&voice, action);
                    }
                    GuiEvent::ContextChanged => voice.notify_context_changed(),
                }
            }
        }
    }
    Ok(())
}
