//! One thread per task, joined by a condition-variable handshake.

use super::signal::{PlaybackState, SessionState, StopSignal};
use super::Signal;
use crate::audio::AudioSource;
use crate::capture::{Capture, CaptureBuffer, ReadMode, Step};
use crate::error::{Error, Result};
use crate::playback::{Playback, PlaybackStep};
use crossbeam::channel;
use std::thread;
use std::time::{Duration, Instant};

pub(super) const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn run(
    playback: Playback,
    source: &mut dyn AudioSource,
    chunk_frames: usize,
    poll: Duration,
    stop: &StopSignal,
) -> Result<CaptureBuffer> {
    let session = SessionState::default();
    let capture = Capture::new(source, chunk_frames, ReadMode::Blocking);
    let (handoff_tx, handoff) = channel::bounded(1);

    let played: Result<Option<Error>> = thread::scope(|s| {
        let player = thread::Builder::new()
            .name("playback".into())
            .spawn_scoped(s, || play(playback, &session, stop))?;
        let recorder = thread::Builder::new()
            .name("capture".into())
            .spawn_scoped(s, || {
                handoff_tx.send(record(capture, &session, stop)).ok();
            })?;

        while !(player.is_finished() && recorder.is_finished()) {
            thread::sleep(poll);
        }
        recorder
            .join()
            .map_err(|_| Error::AudioIn("capture thread panicked".into()))?;
        player
            .join()
            .map_err(|_| Error::MidiOut("playback thread panicked".into()))
    });
    let played = played?;

    // Both threads are joined: the synth is shut down and the stream stopped.
    if stop.is_set() {
        return Err(Error::Cancelled);
    }
    if let Some(e) = played {
        return Err(e);
    }
    handoff
        .try_recv()
        .map_err(|_| Error::AudioIn("capture produced no buffer".into()))?
}

/// Reports `Stopped` however the playback thread exits, so the capture
/// thread can never wait forever.
struct StoppedOnExit<'a>(&'a SessionState);

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        self.0.report(PlaybackState::Stopped);
    }
}

fn play(mut playback: Playback, session: &SessionState, stop: &StopSignal) -> Option<Error> {
    let _exit = StoppedOnExit(session);
    loop {
        let cancelled = stop.is_set() || session.is_aborted();
        match playback.step(Instant::now(), cancelled) {
            // Capped so an aborted capture is noticed within one poll.
            PlaybackStep::Wait(delay) => {
                stop.wait_timeout(delay.min(POLL_INTERVAL));
            }
            PlaybackStep::Audible => {
                session.report(playback.state());
                // Hold the first event until the input stream is running.
                while !session.wait_recording(POLL_INTERVAL) {
                    if stop.is_set() || session.is_aborted() {
                        break;
                    }
                }
            }
            PlaybackStep::Sent | PlaybackStep::Complete => {}
            PlaybackStep::Stopped => break,
        }
        session.report(playback.state());
    }
    playback.take_error()
}

fn record(capture: Capture<'_>, session: &SessionState, stop: &StopSignal) -> Result<CaptureBuffer> {
    let captured = drain(capture, session, stop);
    if let Err(e) = &captured {
        log::error!("capture failed: {e}");
        session.abort();
    }
    captured
}

fn drain(mut capture: Capture<'_>, session: &SessionState, stop: &StopSignal) -> Result<CaptureBuffer> {
    let first = match session.wait_started() {
        PlaybackState::Playing => Signal::Playing,
        _ => Signal::Complete,
    };
    if capture.step(Some(first))? == Step::Done {
        return Ok(capture.into_buffer());
    }
    session.report_recording();
    loop {
        let signal = if stop.is_set() {
            Some(Signal::Term)
        } else if session.get().is_finished() {
            Some(Signal::Complete)
        } else {
            None
        };
        if capture.step(signal)? == Step::Done {
            return Ok(capture.into_buffer());
        }
    }
}
