//! ALSA PCM device wrappers for the voice session.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a mono float capture device at exactly `sample_rate`.
///
/// Outbound frames are labelled with the fixed input rate, so a device that only offers a
/// nearby rate is refused rather than silently mislabelled.
pub fn open_capture(device: &str, sample_rate: u32) -> Result<(PCM, AlsaParams)> {
    let (pcm, params) = open_pcm(
        device,
        Direction::Capture,
        Format::FloatLE,
        sample_rate,
        None,
        "Capture",
    )?;
    require_exact(&params, sample_rate, "Capture")?;
    Ok((pcm, params))
}

/// Open a mono 16-bit playback device at exactly `sample_rate`.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let (pcm, params) = open_pcm(
        device,
        Direction::Playback,
        Format::S16LE,
        sample_rate,
        period_size,
        "Playback",
    )?;
    require_exact(&params, sample_rate, "Playback")?;
    Ok((pcm, params))
}

fn require_exact(params: &AlsaParams, sample_rate: u32, dir_name: &str) -> Result<()> {
    if params.sample_rate != sample_rate || params.channels != 1 {
        bail!(
            "{} device negotiated {} Hz/{}ch, need {} Hz mono",
            dir_name,
            params.sample_rate,
            params.channels,
            sample_rate
        );
    }
    Ok(())
}

fn open_pcm(
    device: &str,
    direction: Direction,
    format: Format,
    sample_rate: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(format)?;
        hwp.set_channels(1)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
