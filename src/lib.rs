//! Realtime voice conversation for the lesson planner: microphone in, assistant speech out,
//! over one duplex session with a remote speech-to-speech model.

pub mod audio;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod gui_bridge;
pub mod net_link;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod test_support;

pub use controller::{AudioSessionManager, SessionEvent, SessionState, VoiceStatus};
pub use error::{Result, VoiceError};
pub use service::{VoiceHandle, VoiceService};
