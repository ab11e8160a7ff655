use alsa::{Direction, PCM, pcm::{Access, Format, HwParams}, ValueOr};
use alsasrc_core::SampleSpec;
use thiserror::Error;

use crate::error::DriverError;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("alsa error: {0}")]
    Alsa(#[from] alsa::Error),
    #[error("invalid period size (requested {requested}, min = {min}, max = {max})")]
    InvalidPeriodSize { requested: i64, min: i64, max: i64 },
    #[error("invalid buffer size (requested {requested}, min = {min}, max = {max})")]
    InvalidBufferSize { requested: i64, min: i64, max: i64 },
    #[error("unsupported sample format")]
    UnsupportedFormat,
}

/// What the engine asked for when opening the device.
pub struct OpenOptions<'a> {
    pub device: &'a str,
    pub spec: SampleSpec,
    pub fragment_frames: i64,
    pub n_fragments: i64,
    pub mmap: bool,
}

pub fn open_pcm(opt: &OpenOptions) -> Result<PCM, OpenError> {
    let pcm = PCM::new(opt.device, Direction::Capture, false)?;

    let format = match opt.spec.format {
        alsasrc_core::SampleFormat::S16LE => Format::s16(),
        alsasrc_core::SampleFormat::F32LE => Format::float(),
    };

    {
        let hwp = HwParams::any(&pcm)?;
        hwp.set_channels(opt.spec.channels.into())?;
        hwp.set_rate(opt.spec.rate, ValueOr::Nearest)?;
        hwp.set_format(format)?;
        hwp.set_access(if opt.mmap { Access::MMapInterleaved } else { Access::RWInterleaved })?;
        set_period_size(&hwp, opt.fragment_frames)?;
        set_buffer_size(&hwp, opt.fragment_frames * opt.n_fragments)?;
        pcm.hw_params(&hwp)?;
    }

    apply_default_sw_params(&pcm)?;

    let (buffer, period) = pcm.get_params()?;
    log::info!("opened ALSA device {} with buffer_size={buffer}, period_size={period}", opt.device);

    Ok(pcm)
}

/// Recompute and push software parameters. `hwbuf_unused`
/// becomes the start threshold's complement and `avail_min` the minimum
/// wakeup threshold.
pub fn apply_sw_params(pcm: &PCM, hwbuf_size_frames: i64, hwbuf_unused_frames: i64, avail_min_frames: i64) -> Result<(), DriverError> {
    let swp = pcm.sw_params_current().map_err(DriverError::from_alsa)?;
    let start_threshold = (hwbuf_size_frames - hwbuf_unused_frames).max(1);
    swp.set_start_threshold(start_threshold).map_err(DriverError::from_alsa)?;
    swp.set_avail_min(avail_min_frames.max(1)).map_err(DriverError::from_alsa)?;
    pcm.sw_params(&swp).map_err(DriverError::from_alsa)?;
    Ok(())
}

fn apply_default_sw_params(pcm: &PCM) -> Result<(), OpenError> {
    let hwp = pcm.hw_params_current()?;
    let swp = pcm.sw_params_current()?;
    swp.set_start_threshold(hwp.get_buffer_size()?)?;
    pcm.sw_params(&swp)?;
    Ok(())
}

fn set_period_size(hwp: &HwParams, period: i64) -> Result<(), OpenError> {
    let min = hwp.get_period_size_min()?;
    let max = hwp.get_period_size_max()?;

    if period < min || period > max {
        return Err(OpenError::InvalidPeriodSize { requested: period, min, max });
    }

    hwp.set_period_size(period, ValueOr::Nearest)?;
    Ok(())
}

fn set_buffer_size(hwp: &HwParams, buffer: i64) -> Result<(), OpenError> {
    let min = hwp.get_buffer_size_min()?;
    let max = hwp.get_buffer_size_max()?;

    if buffer < min || buffer > max {
        return Err(OpenError::InvalidBufferSize { requested: buffer, min, max });
    }

    hwp.set_buffer_size(buffer)?;
    Ok(())
}
