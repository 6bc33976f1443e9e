//! Wire messages exchanged with the remote conversation endpoint.
//!
//! Outbound: `{"audio_frame":{"sample_rate":16000,"encoding":"pcm16","data":"..."}}` or
//! `{"text_event":"..."}`.
//! Inbound: `audio_frame`, `{"interrupted":true}`, `opened`, `closed`, `{"error":"..."}`.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::audio::pcm;
use crate::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    Pcm16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
    /// base64 PCM16 little-endian
    pub data: String,
}

impl AudioFrame {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            sample_rate,
            encoding: AudioEncoding::Pcm16,
            data: pcm::encode_base64(samples),
        }
    }

    pub fn decode(&self) -> Result<Vec<f32>> {
        pcm::decode_base64(&self.data)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboundMessage {
    AudioFrame(AudioFrame),
    TextEvent(String),
}

/// Raw inbound message as it appears on the wire.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    AudioFrame(AudioFrame),
    Interrupted(bool),
    Opened(IgnoredAny),
    Closed(IgnoredAny),
    Error(String),
}

/// Inbound event delivered to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Opened,
    Audio(AudioFrame),
    Interrupted,
    Closed,
    Error(String),
}

impl ServerMessage {
    /// `None` for messages that carry no event (`{"interrupted": false}`).
    pub fn into_event(self) -> Option<InboundEvent> {
        match self {
            ServerMessage::AudioFrame(frame) => Some(InboundEvent::Audio(frame)),
            ServerMessage::Interrupted(true) => Some(InboundEvent::Interrupted),
            ServerMessage::Interrupted(false) => None,
            ServerMessage::Opened(_) => Some(InboundEvent::Opened),
            ServerMessage::Closed(_) => Some(InboundEvent::Closed),
            ServerMessage::Error(message) => Some(InboundEvent::Error(message)),
        }
    }
}

/// Parse one inbound text frame.
pub fn parse_server_text(text: &str) -> serde_json::Result<Option<InboundEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)?;
    Ok(msg.into_event())
}
