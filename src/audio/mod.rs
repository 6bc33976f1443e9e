//! audio - capture, playback and scheduling for the voice session
//!
//! `device` holds the seams the session manager talks to, `scheduler` does gapless
//! playback timing over them, and `pcm` converts between float samples and the wire
//! format. The ALSA backend is compiled with the `alsa` feature.

pub mod device;
pub mod pcm;
pub mod scheduler;

#[cfg(feature = "alsa")]
mod alsa_device;
#[cfg(feature = "alsa")]
mod audio_system;
#[cfg(feature = "alsa")]
mod play;
#[cfg(feature = "alsa")]
mod record;

#[cfg(feature = "alsa")]
pub use audio_system::{AlsaBackend, AudioConfig};
