//! Audio input: a pull-style source over a CPAL input stream.
//!
//! CPAL pushes samples from its own callback and its `Stream` cannot leave
//! the thread that built it, so every recording gets a keeper thread that
//! owns the stream and feeds an SPSC ring. Readers pull fixed-size chunks
//! from the ring.

use crate::error::{Error, Result};
use anyhow::{Context, anyhow};
use cpal::{
    BufferSize, FromSample, HostId, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, host_from_id,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Seconds of audio the ring can hold before the callback starts dropping.
const RING_SECONDS: usize = 4;

/// A read that sees no new audio for this long is treated as a dead device.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// Pull-based interleaved `i16` input. Opening is the constructor, closing
/// is `Drop`.
pub trait AudioSource: Send {
    fn format(&self) -> StreamFormat;

    fn start(&mut self) -> Result<()>;

    /// Frames that can be read right now without blocking.
    fn available(&self) -> usize;

    /// Block until `frames` frames are buffered and return them.
    fn read(&mut self, frames: usize) -> Result<Vec<i16>>;

    /// Stop recording and discard anything still buffered.
    fn stop(&mut self) -> Result<()>;
}

pub struct CpalSource {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    live: Option<LiveStream>,
}

struct LiveStream {
    samples: HeapCons<i16>,
    ready: Receiver<()>,
    halt: Sender<()>,
    keeper: JoinHandle<()>,
}

impl CpalSource {
    /// Open an input device whose name contains `wanted`, or the host default.
    /// Fails if the device cannot record `format`.
    pub fn open(wanted: Option<&str>, format: StreamFormat) -> anyhow::Result<Self> {
        // Prefer JACK; fall back to default host.
        let host = host_from_id(HostId::Jack).unwrap_or_else(|_| cpal::default_host());
        let device = match wanted {
            Some(needle) => {
                let needle = needle.to_lowercase();
                host.input_devices()?
                    .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&needle)))
                    .with_context(|| format!("no input device matching {needle:?}"))?
            }
            None => host
                .default_input_device()
                .context("no default input device")?,
        };
        let name = device.name().unwrap_or_default();

        let rate = SampleRate(format.sample_rate);
        let mut formats: Vec<SampleFormat> = device
            .supported_input_configs()
            .with_context(|| format!("query input configs of {name}"))?
            .filter(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
            .map(|c| c.sample_format())
            .collect();
        formats.sort_by_key(|f| *f != SampleFormat::I16);
        let sample_format = *formats.first().ok_or_else(|| {
            anyhow!(
                "{name} cannot record {} ch @ {} Hz",
                format.channels,
                format.sample_rate
            )
        })?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: rate,
            buffer_size: BufferSize::Default,
        };

        // Build once up front so a broken device aborts before any file.
        let (prod, _cons) = HeapRb::<i16>::new(1).split();
        let (ready, _) = channel::bounded(1);
        drop(build_stream(&device, &config, sample_format, prod, ready)?);

        log::info!(
            "🎙 Recording from {name} ({} ch @ {} Hz, {sample_format:?})",
            format.channels,
            format.sample_rate
        );
        Ok(Self {
            device,
            config,
            sample_format,
            live: None,
        })
    }
}

impl AudioSource for CpalSource {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }
        let capacity =
            self.config.sample_rate.0 as usize * self.config.channels as usize * RING_SECONDS;
        let (prod, samples) = HeapRb::<i16>::new(capacity).split();
        let (ready_tx, ready) = channel::bounded(1);
        let (halt, halted) = channel::bounded::<()>(0);
        let (started_tx, started) = channel::bounded(1);

        let device = self.device.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let keeper = thread::Builder::new()
            .name("capture-stream".into())
            .spawn(move || {
                let stream = build_stream(&device, &config, sample_format, prod, ready_tx)
                    .and_then(|s| s.play().map(|_| s).map_err(anyhow::Error::from));
                match stream {
                    Ok(stream) => {
                        started_tx.send(Ok(())).ok();
                        // Sender dropped or signalled: either way we are done.
                        halted.recv().ok();
                        drop(stream);
                    }
                    Err(e) => {
                        started_tx.send(Err(format!("{e:#}"))).ok();
                    }
                }
            })?;

        match started.recv() {
            Ok(Ok(())) => {
                self.live = Some(LiveStream {
                    samples,
                    ready,
                    halt,
                    keeper,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                keeper.join().ok();
                Err(Error::AudioIn(e))
            }
            Err(_) => Err(Error::AudioIn("capture thread died".into())),
        }
    }

    fn available(&self) -> usize {
        self.live
            .as_ref()
            .map_or(0, |l| l.samples.occupied_len() / self.config.channels as usize)
    }

    fn read(&mut self, frames: usize) -> Result<Vec<i16>> {
        let channels = self.config.channels as usize;
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| Error::AudioIn("read before start".into()))?;

        let wanted = frames * channels;
        while live.samples.occupied_len() < wanted {
            match live.ready.recv_timeout(STALL_TIMEOUT) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::AudioIn(format!("no audio for {STALL_TIMEOUT:?}")));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::AudioIn("input stream closed".into()));
                }
            }
        }
        let mut chunk = vec![0i16; wanted];
        live.samples.pop_slice(&mut chunk);
        Ok(chunk)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(live) = self.live.take() {
            live.halt.send(()).ok();
            live.keeper
                .join()
                .map_err(|_| Error::AudioIn("capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("closing input stream: {e}");
        }
    }
}

// ───────────────────────────── helpers ─────────────────────────────────── //

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    prod: HeapProd<i16>,
    ready: Sender<()>,
) -> anyhow::Result<Stream> {
    match sample_format {
        SampleFormat::I16 => build_typed::<i16>(device, config, prod, ready),
        SampleFormat::U16 => build_typed::<u16>(device, config, prod, ready),
        SampleFormat::I32 => build_typed::<i32>(device, config, prod, ready),
        SampleFormat::F32 => build_typed::<f32>(device, config, prod, ready),
        SampleFormat::F64 => build_typed::<f64>(device, config, prod, ready),
        other => Err(anyhow!("unsupported input sample format {other:?}")),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut prod: HeapProd<i16>,
    ready: Sender<()>,
) -> anyhow::Result<Stream>
where
    T: Sample + SizedSample,
    i16: FromSample<T>,
{
    let err_fn = |e| log::error!("audio stream error: {e}");
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |input: &[T], _: &cpal::InputCallbackInfo| {
            // A full ring drops the newest frames; readers fall behind only
            // if the session thread stalls for RING_SECONDS.
            push_frames(&mut prod, input, channels);
            ready.try_send(()).ok();
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Push as many whole frames of `input` as fit, so a full ring never splits
/// a frame across channels. Returns the samples pushed.
fn push_frames<T, P>(prod: &mut P, input: &[T], channels: usize) -> usize
where
    T: Sample,
    i16: FromSample<T>,
    P: Producer<Item = i16>,
{
    let channels = channels.max(1);
    let room = prod.vacant_len() / channels * channels;
    prod.push_iter(input.iter().take(room).map(|&s| s.to_sample::<i16>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ring_keeps_frames_whole() {
        let (mut prod, mut cons) = HeapRb::<i16>::new(5).split();
        assert_eq!(push_frames(&mut prod, &[1i16, 2, 3, 4], 2), 4);
        // One slot left: half a stereo frame must not go in.
        assert_eq!(push_frames(&mut prod, &[5i16, 6], 2), 0);
        assert_eq!(cons.occupied_len(), 4);

        let mut out = [0i16; 4];
        cons.pop_slice(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(push_frames(&mut prod, &[0.5f32, -0.5, 0.25, -0.25], 2), 4);
        let mut out = [0i16; 4];
        cons.pop_slice(&mut out);
        assert!(out[0] > 0 && out[1] < 0 && out[2] > 0 && out[3] < 0);
    }

    #[test]
    fn frames_convert_to_wall_time() {
        let fmt = StreamFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(fmt.frames_to_duration(48_000), Duration::from_secs(1));
        assert_eq!(fmt.frames_to_duration(24_000), Duration::from_millis(500));
    }
}
