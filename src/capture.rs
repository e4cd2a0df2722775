//! Audio capture task and the buffer it hands back.

use crate::audio::{AudioSource, StreamFormat};
use crate::engine::Signal;
use crate::error::Result;
use std::time::Duration;

/// Chunks of interleaved samples, in recording order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    format: StreamFormat,
    chunks: Vec<Vec<i16>>,
}

impl CaptureBuffer {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            chunks: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: Vec<i16>) {
        self.chunks.push(chunk);
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn chunks(&self) -> &[Vec<i16>] {
        &self.chunks
    }

    pub fn frames(&self) -> usize {
        let samples: usize = self.chunks.iter().map(Vec::len).sum();
        samples / self.format.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.frames())
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Vec::is_empty)
    }

    /// Flatten into an N × C frame matrix.
    pub fn into_frames(self) -> Frames {
        Frames {
            channels: self.format.channels.max(1) as usize,
            samples: self.chunks.concat(),
        }
    }
}

/// Interleaved samples viewed as `len()` frames of `channels()` samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frames {
    channels: usize,
    samples: Vec<i16>,
}

impl Frames {
    pub fn len(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn frame(&self, index: usize) -> &[i16] {
        &self.samples[index * self.channels..(index + 1) * self.channels]
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// One plane per channel (left, right, ...).
    pub fn deinterleave(&self) -> Vec<Vec<i16>> {
        (0..self.channels)
            .map(|c| {
                self.samples
                    .iter()
                    .skip(c)
                    .step_by(self.channels)
                    .copied()
                    .collect()
            })
            .collect()
    }

    /// Interleave equally long planes back into frames.
    pub fn from_planes(planes: &[Vec<i16>]) -> Self {
        let channels = planes.len().max(1);
        let len = planes.iter().map(Vec::len).min().unwrap_or(0);
        let samples = (0..len)
            .flat_map(|i| planes.iter().map(move |p| p[i]))
            .collect();
        Self { channels, samples }
    }

    /// Split back into chunks of `chunk_frames` frames; the last may be short.
    #[cfg(test)]
    pub fn into_chunks(self, chunk_frames: usize) -> Vec<Vec<i16>> {
        self.samples
            .chunks((chunk_frames * self.channels).max(1))
            .map(<[i16]>::to_vec)
            .collect()
    }
}

/// How the task pulls from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Block on the device until a full chunk arrives.
    Blocking,
    /// Only read once most of a chunk is already buffered, otherwise yield.
    Polled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do yet.
    Pending,
    /// Made progress.
    Advanced,
    /// Finished; the task must not be resumed again.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Recording,
    Done,
}

/// Pulls chunks from a source between the "playing" and "complete" signals.
pub struct Capture<'a> {
    source: &'a mut dyn AudioSource,
    chunk_frames: usize,
    min_frames: usize,
    mode: ReadMode,
    buffer: CaptureBuffer,
    phase: Phase,
}

impl<'a> Capture<'a> {
    pub fn new(source: &'a mut dyn AudioSource, chunk_frames: usize, mode: ReadMode) -> Self {
        let chunk_frames = chunk_frames.max(1);
        let format = source.format();
        Self {
            source,
            chunk_frames,
            min_frames: (chunk_frames * 9).div_ceil(10),
            mode,
            buffer: CaptureBuffer::new(format),
            phase: Phase::Waiting,
        }
    }

    pub fn step(&mut self, signal: Option<Signal>) -> Result<Step> {
        match (self.phase, signal) {
            (Phase::Done, _) => Ok(Step::Done),
            (Phase::Waiting, Some(Signal::Playing)) => {
                log::info!("Recording track");
                self.source.start()?;
                self.phase = Phase::Recording;
                Ok(Step::Advanced)
            }
            (Phase::Waiting, Some(Signal::Complete | Signal::Stop | Signal::Term)) => {
                self.phase = Phase::Done;
                Ok(Step::Done)
            }
            (Phase::Waiting, None) => Ok(Step::Pending),
            (Phase::Recording, Some(Signal::Complete | Signal::Stop | Signal::Term)) => {
                self.finish()?;
                Ok(Step::Done)
            }
            (Phase::Recording, _) => {
                if self.mode == ReadMode::Polled && self.source.available() < self.min_frames {
                    return Ok(Step::Pending);
                }
                let chunk = self.source.read(self.chunk_frames)?;
                self.buffer.push(chunk);
                Ok(Step::Advanced)
            }
        }
    }

    pub fn into_buffer(self) -> CaptureBuffer {
        let mut this = self;
        let format = this.buffer.format;
        std::mem::replace(&mut this.buffer, CaptureBuffer::new(format))
    }

    fn finish(&mut self) -> Result<()> {
        self.phase = Phase::Done;
        log::info!(
            "Finished recording ({} chunks, {:.2} s)",
            self.buffer.chunks().len(),
            self.buffer.duration().as_secs_f64()
        );
        self.source.stop()
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        if self.phase == Phase::Recording {
            self.phase = Phase::Done;
            if let Err(e) = self.source.stop() {
                log::warn!("stopping input stream: {e}");
            }
        }
    }
}
