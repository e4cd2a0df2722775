//! Turns a finished capture into a file on disk and reports its level.

use crate::capture::{CaptureBuffer, Frames};
use crate::error::{Error, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use num_traits::{Bounded, ToPrimitive};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    /// Largest absolute sample, 0.0..=1.0 of full scale.
    pub peak: f64,
    pub clipped: bool,
}

/// Peak of `samples` relative to the type's full scale.
pub fn measure<T>(samples: &[T]) -> Levels
where
    T: Copy + PartialEq + Bounded + ToPrimitive,
{
    let full_scale = T::max_value().to_f64().unwrap_or(1.0);
    let peak = samples
        .iter()
        .filter_map(|s| s.to_f64())
        .map(f64::abs)
        .fold(0.0f64, f64::max)
        // |MIN| is one past MAX for two's complement.
        .min(full_scale);
    Levels {
        peak: peak / full_scale,
        clipped: samples.iter().any(|s| *s == T::max_value() || *s == T::min_value()),
    }
}

/// What happens to a capture after recording.
pub trait PostProcess {
    fn process(&mut self, buffer: CaptureBuffer, out: &Path) -> Result<Levels>;
}

/// Writes 16-bit WAV files.
#[derive(Debug, Default)]
pub struct WavOutput;

impl PostProcess for WavOutput {
    fn process(&mut self, buffer: CaptureBuffer, out: &Path) -> Result<Levels> {
        let format = buffer.format();
        let planes = buffer.into_frames().deinterleave();
        let mut levels = measure::<i16>(&[]);
        for (channel, plane) in planes.iter().enumerate() {
            let l = measure(plane);
            log::debug!("channel {channel}: peak {:.4}", l.peak);
            levels.peak = levels.peak.max(l.peak);
            levels.clipped |= l.clipped;
        }

        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let frames = Frames::from_planes(&planes);
        log::info!(
            "Writing {} frames to file: {}",
            frames.len(),
            out.display()
        );
        // The real name only appears once the file is complete.
        let part = out.with_extension("wav.part");
        let written = write_wav(&part, spec, frames.samples())
            .and_then(|()| std::fs::rename(&part, out).map_err(Error::from));
        if written.is_err() {
            std::fs::remove_file(&part).ok();
        }
        written.map(|()| levels)
    }
}

fn write_wav(path: &Path, spec: WavSpec, samples: &[i16]) -> Result<()> {
    let mut writer = WavWriter::create(path, spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

fn wav_error(e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(io) => Error::Io(io),
        other => Error::Io(std::io::Error::other(other.to_string())),
    }
}
