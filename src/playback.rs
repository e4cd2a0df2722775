//! MIDI playback task.
//!
//! `Playback` is an explicit state machine: every call to `step` does at most
//! one unit of work and says how long the caller may wait before the next
//! call. The threaded engine sleeps on that hint, the cooperative engine
//! just moves on to the other task.

use crate::engine::PlaybackState;
use crate::error::{Error, Result};
use crate::midi::MidiSink;
use crate::reset::{self, ResetSequence};
use crate::song::{Message, Song};
use std::time::{Duration, Instant};

/// Time left after the last event for sustained notes to decay.
pub const DEFAULT_TAIL: Duration = Duration::from_millis(300);

/// Owns the output device. Shutdown (all sound off on every channel, reset,
/// close) runs exactly once: explicitly, or when the guard is dropped.
pub struct SynthGuard {
    sink: Option<Box<dyn MidiSink>>,
    reset: ResetSequence,
}

impl SynthGuard {
    pub fn new(sink: Box<dyn MidiSink>, reset: ResetSequence) -> Self {
        Self {
            sink: Some(sink),
            reset,
        }
    }

    pub fn send(&mut self, msg: &[u8]) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.send(msg),
            None => Err(Error::MidiOut("synth already shut down".into())),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        for msg in self.reset.messages() {
            self.send(msg)?;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        log::info!("Stopping MIDI playback");
        // Keep going on errors: a half-reset synth is better than a stuck note.
        for msg in reset::all_sound_off() {
            if let Err(e) = sink.send(&msg) {
                log::warn!("all sound off: {e}");
            }
        }
        for msg in self.reset.messages() {
            if let Err(e) = sink.send(msg) {
                log::warn!("reset: {e}");
            }
        }
        sink.close();
    }
}

impl Drop for SynthGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Result of one `Playback::step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStep {
    /// Reset sent; the clock starts on the next call, sound follows.
    Audible,
    /// Nothing due yet; call again after at most this long.
    Wait(Duration),
    /// One event was processed.
    Sent,
    /// Last event and tail are done.
    Complete,
    /// The device is shut down. Terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Armed,
    Playing { next: usize },
    Tail { until: Instant },
    Complete,
    Stopped,
}

pub struct Playback {
    name: String,
    synth: SynthGuard,
    song: Song,
    offsets: Vec<Duration>,
    tail: Duration,
    start: Instant,
    phase: Phase,
    error: Option<Error>,
}

impl Playback {
    pub fn new(name: impl Into<String>, synth: SynthGuard, song: Song, tail: Duration) -> Self {
        let offsets = song.offsets();
        Self {
            name: name.into(),
            synth,
            song,
            offsets,
            tail,
            start: Instant::now(),
            phase: Phase::NotStarted,
            error: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match self.phase {
            Phase::NotStarted => PlaybackState::NotStarted,
            Phase::Armed | Phase::Playing { .. } | Phase::Tail { .. } => PlaybackState::Playing,
            Phase::Complete => PlaybackState::Draining,
            Phase::Stopped => PlaybackState::Stopped,
        }
    }

    /// The error that ended playback early, if any.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    pub fn step(&mut self, now: Instant, cancelled: bool) -> PlaybackStep {
        if cancelled && self.phase != Phase::Stopped {
            log::debug!("playback of {} cancelled", self.name);
            return self.stop();
        }

        match self.phase {
            Phase::NotStarted => {
                log::info!("Playing '{}'", self.name);
                if let Err(e) = self.synth.reset() {
                    return self.fail(e);
                }
                self.phase = Phase::Armed;
                PlaybackStep::Audible
            }
            Phase::Armed => {
                // Offsets count from here, so the caller can hold back the
                // first event until the recorder is running.
                self.start = now;
                self.phase = Phase::Playing { next: 0 };
                self.step(now, cancelled)
            }
            Phase::Playing { next } if next == self.offsets.len() => {
                self.phase = Phase::Tail {
                    until: now + self.tail,
                };
                PlaybackStep::Wait(self.tail)
            }
            Phase::Playing { next } => {
                // Target the file's own schedule, not the previous send, so
                // scheduling overhead does not pile up between events.
                let elapsed = now.saturating_duration_since(self.start);
                if self.offsets[next] > elapsed {
                    return PlaybackStep::Wait(self.offsets[next] - elapsed);
                }
                if let Message::Sound(bytes) = &self.song.events()[next].message {
                    if let Err(e) = self.synth.send(bytes) {
                        return self.fail(e);
                    }
                }
                self.phase = Phase::Playing { next: next + 1 };
                PlaybackStep::Sent
            }
            Phase::Tail { until } if now < until => PlaybackStep::Wait(until - now),
            Phase::Tail { .. } => {
                self.phase = Phase::Complete;
                PlaybackStep::Complete
            }
            Phase::Complete | Phase::Stopped => self.stop(),
        }
    }

    fn fail(&mut self, e: Error) -> PlaybackStep {
        log::error!("Exception with file: \"{}\": {e}", self.name);
        self.error = Some(e);
        self.stop()
    }

    fn stop(&mut self) -> PlaybackStep {
        self.synth.shutdown();
        self.phase = Phase::Stopped;
        PlaybackStep::Stopped
    }
}
