//! PCM16 conversion and base64 framing for the realtime audio link.
//!
//! Outbound: normalized f32 samples → clamp → i16 (asymmetric scale) → LE bytes → base64.
//! Inbound: base64 → LE bytes → i16 → f32 (divide by 32768).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::{Result, VoiceError};

/// Microphone capture rate sent to the remote endpoint (mono).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of synthesized audio received from the remote endpoint (mono).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Convert one normalized sample to PCM16.
///
/// Negative values scale by 32768 and non-negative by 32767, so both -1.0 and +1.0 land
/// exactly on the i16 range limits.
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode float samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| float_to_pcm16(s).to_le_bytes())
        .collect()
}

/// Decode little-endian PCM16 bytes into float samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.is_empty() {
        return Err(VoiceError::PlaybackDecodeFailed("empty audio payload".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::PlaybackDecodeFailed(format!(
            "odd PCM16 payload length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| pcm16_to_float(i16::from_le_bytes([chunk[0], chunk[1]])))
        .collect())
}

/// Float samples → base64 PCM16 payload.
pub fn encode_base64(samples: &[f32]) -> String {
    B64.encode(encode_pcm16(samples))
}

/// Base64 PCM16 payload → float samples.
pub fn decode_base64(data: &str) -> Result<Vec<f32>> {
    let bytes = B64
        .decode(data)
        .map_err(|e| VoiceError::PlaybackDecodeFailed(format!("invalid base64: {}", e)))?;
    decode_pcm16(&bytes)
}
