#[derive(Debug, Clone)]
pub struct Config {
    // 网络配置
    pub ws_url: &'static str,
    pub ws_token: &'static str,
    // 客户端标识（动态部分，可在运行时修改）
    pub client_id: String,

    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_frame_samples: usize,
    pub playback_period_size: usize,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_local_ip: &'static str,
    pub gui_remote_ip: &'static str,
    pub gui_buffer_size: usize,

    // 会话配置
    pub context_file: &'static str,
    pub context_poll_ms: u64,
    pub event_capacity: usize,
    pub send_capacity: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL"),
            ws_token: env!("WS_TOKEN"),
            client_id: env!("CLIENT_ID").to_string(),

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            input_sample_rate: env!("INPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse OUTPUT_SAMPLE_RATE")?,
            capture_frame_samples: env!("CAPTURE_FRAME_SAMPLES").parse()
                .map_err(|_| "Failed to parse CAPTURE_FRAME_SAMPLES")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            gui_local_port: env!("GUI_LOCAL_PORT").parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT").parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_buffer_size: env!("GUI_BUFFER_SIZE").parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,

            context_file: env!("CONTEXT_FILE"),
            context_poll_ms: env!("CONTEXT_POLL_MS").parse()
                .map_err(|_| "Failed to parse CONTEXT_POLL_MS")?,
            event_capacity: env!("EVENT_CAPACITY").parse()
                .map_err(|_| "Failed to parse EVENT_CAPACITY")?,
            send_capacity: env!("SEND_CAPACITY").parse()
                .map_err(|_| "Failed to parse SEND_CAPACITY")?,
        })
    }

    /// Settings the session manager needs, detached from the process-level config.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            capture_frame_samples: self.capture_frame_samples,
            event_capacity: self.event_capacity,
        }
    }
}

/// Per-session parameters for [`crate::controller::AudioSessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub capture_frame_samples: usize,
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            input_sample_rate: crate::audio::pcm::INPUT_SAMPLE_RATE,
            output_sample_rate: crate::audio::pcm::OUTPUT_SAMPLE_RATE,
            capture_frame_samples: 4096,
            event_capacity: 256,
        }
    }
}
