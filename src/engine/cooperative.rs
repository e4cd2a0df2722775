//! Both tasks on the caller's thread, round-robin.
//!
//! Each turn pops a task, resumes it with the current control signal and
//! puts it back unless it answered `Stop`. Nothing blocks except a capture
//! read once most of a chunk is already buffered, so timing is bounded by
//! how quickly the loop comes back to each task.

use super::signal::StopSignal;
use super::Signal;
use crate::audio::AudioSource;
use crate::capture::{Capture, CaptureBuffer, ReadMode, Step};
use crate::error::{Error, Result};
use crate::playback::{Playback, PlaybackStep};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Back-off once every queued task has yielded without progress.
const IDLE_TICK: Duration = Duration::from_millis(1);

enum Task<'a> {
    Play(Playback),
    Record(Capture<'a>),
}

impl Task<'_> {
    /// Returns the task's answer and whether it did any work.
    fn resume(&mut self, signal: Option<Signal>) -> Result<(Option<Signal>, bool)> {
        match self {
            Task::Play(playback) => {
                let cancelled = signal == Some(Signal::Term);
                Ok(match playback.step(Instant::now(), cancelled) {
                    PlaybackStep::Audible => (Some(Signal::Playing), true),
                    PlaybackStep::Wait(_) => (None, false),
                    PlaybackStep::Sent => (None, true),
                    PlaybackStep::Complete => (Some(Signal::Complete), true),
                    PlaybackStep::Stopped => (Some(Signal::Stop), true),
                })
            }
            Task::Record(capture) => Ok(match capture.step(signal)? {
                Step::Pending => (None, false),
                Step::Advanced => (None, true),
                Step::Done => (Some(Signal::Stop), true),
            }),
        }
    }
}

pub(super) fn run(
    playback: Playback,
    source: &mut dyn AudioSource,
    chunk_frames: usize,
    stop: &StopSignal,
) -> Result<CaptureBuffer> {
    let capture = Capture::new(source, chunk_frames, ReadMode::Polled);
    let mut queue = VecDeque::from([Task::Record(capture), Task::Play(playback)]);
    let mut finished = Vec::with_capacity(2);
    let mut audible = false;
    let mut complete = false;
    let mut idle = 0;

    while let Some(mut task) = queue.pop_front() {
        if stop.is_set() {
            queue.push_front(task);
            terminate(queue);
            return Err(Error::Cancelled);
        }

        let control = if complete {
            Some(Signal::Complete)
        } else if audible {
            Some(Signal::Playing)
        } else {
            None
        };
        let (reply, progressed) = match task.resume(control) {
            Ok(answer) => answer,
            Err(e) => {
                drop(task);
                terminate(queue);
                return Err(e);
            }
        };

        match reply {
            Some(Signal::Playing) => audible = true,
            Some(Signal::Complete) => complete = true,
            Some(Signal::Stop) => {
                // Playback gone for any reason means capture is done too.
                if matches!(task, Task::Play(_)) {
                    complete = true;
                }
                finished.push(task);
                idle = 0;
                continue;
            }
            Some(Signal::Term) | None => {}
        }
        queue.push_back(task);

        idle = if progressed { 0 } else { idle + 1 };
        if idle >= queue.len() {
            thread::sleep(IDLE_TICK);
            idle = 0;
        }
    }

    let mut buffer = None;
    for task in finished {
        match task {
            Task::Play(mut playback) => {
                if let Some(e) = playback.take_error() {
                    return Err(e);
                }
            }
            Task::Record(capture) => buffer = Some(capture.into_buffer()),
        }
    }
    buffer.ok_or_else(|| Error::AudioIn("capture produced no buffer".into()))
}

/// Hand `Term` to every task still queued so each runs its shutdown.
fn terminate(queue: VecDeque<Task<'_>>) {
    log::debug!("terminating {} task(s)", queue.len());
    for mut task in queue {
        if let Err(e) = task.resume(Some(Signal::Term)) {
            log::warn!("shutdown after cancel: {e}");
        }
    }
}
