//! Playback/capture synchronization.
//!
//! A session plays one file into the synth while recording the synth's
//! output. Capture starts only once playback has sent its reset, playback's
//! clock starts only once capture is running, and both sides stop together,
//! either when playback completes (last event plus tail) or when the run is
//! cancelled. Cancellation always ends with the synth's shutdown burst and
//! discards the capture.
//!
//! Two schedulers drive the same `Playback`/`Capture` state machines:
//! [`Strategy::Threaded`] runs them on two threads, [`Strategy::Cooperative`]
//! interleaves them on the caller's thread.

mod cooperative;
mod signal;
mod threaded;

pub use signal::{PlaybackState, SessionState, StopSignal};

use crate::audio::AudioSource;
use crate::capture::CaptureBuffer;
use crate::error::Result;
use crate::midi::MidiSink;
use crate::playback::{DEFAULT_TAIL, Playback, SynthGuard};
use crate::reset::ResetSequence;
use crate::song::Song;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Signals exchanged between the cooperative scheduler and its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Playback is audible; capture may start.
    Playing,
    /// Playback finished naturally; capture should stop.
    Complete,
    /// The task has shut down and must not be resumed.
    Stop,
    /// The caller cancelled the run.
    Term,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Threaded,
    /// Single thread; timing is only as good as the scheduler's turnaround.
    Cooperative,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "threaded" | "threads" => Ok(Strategy::Threaded),
            "cooperative" | "coop" => Ok(Strategy::Cooperative),
            other => Err(format!("unknown strategy {other:?}")),
        }
    }
}

pub struct Engine {
    strategy: Strategy,
    reset: ResetSequence,
    chunk_frames: usize,
    tail: Duration,
    poll: Duration,
    stop: StopSignal,
}

impl Engine {
    pub fn new(strategy: Strategy, stop: StopSignal) -> Self {
        Self {
            strategy,
            reset: ResetSequence::default(),
            chunk_frames: 2048,
            tail: DEFAULT_TAIL,
            poll: threaded::POLL_INTERVAL,
            stop,
        }
    }

    pub fn with_reset(mut self, reset: ResetSequence) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Play `path` through `sink` and return what `source` heard.
    ///
    /// The sink is always shut down and closed before this returns.
    pub fn record(
        &self,
        path: &Path,
        sink: Box<dyn MidiSink>,
        source: &mut dyn AudioSource,
    ) -> Result<CaptureBuffer> {
        let synth = SynthGuard::new(sink, self.reset);
        let song = Song::load(path)?;
        log::debug!(
            "{} of {} events audible, {:.1} s nominal",
            song.events().iter().filter(|e| e.is_sound()).count(),
            song.events().len(),
            song.duration().as_secs_f64()
        );
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.run(Playback::new(name, synth, song, self.tail), source)
    }

    #[cfg(test)]
    pub fn record_song(
        &self,
        name: &str,
        song: Song,
        sink: Box<dyn MidiSink>,
        source: &mut dyn AudioSource,
    ) -> Result<CaptureBuffer> {
        let synth = SynthGuard::new(sink, self.reset);
        self.run(Playback::new(name, synth, song, self.tail), source)
    }

    fn run(&self, playback: Playback, source: &mut dyn AudioSource) -> Result<CaptureBuffer> {
        log::debug!("session start ({:?})", self.strategy);
        match self.strategy {
            Strategy::Threaded => {
                threaded::run(playback, source, self.chunk_frames, self.poll, &self.stop)
            }
            Strategy::Cooperative => {
                cooperative::run(playback, source, self.chunk_frames, &self.stop)
            }
        }
    }
}
