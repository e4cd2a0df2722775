//! Cross-task state: the caller's stop flag and the per-session playback
//! state. Each has exactly one writer.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Set once by whoever wants the run to end (Ctrl-C); read by every task.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` unless stopped first. Returns whether stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let mut stopped = flag.lock();
        if !*stopped {
            cond.wait_while_for(&mut stopped, |s| !*s, timeout);
        }
        *stopped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    NotStarted,
    Playing,
    Draining,
    Stopped,
}

impl PlaybackState {
    /// Capture should stop once playback has left `Playing`.
    pub fn is_finished(self) -> bool {
        matches!(self, PlaybackState::Draining | PlaybackState::Stopped)
    }
}

/// Playback state as seen by the capture side of a session, plus what the
/// capture side reports back: the stream is running, or the file is lost.
pub struct SessionState {
    state: Mutex<PlaybackState>,
    changed: Condvar,
    recording: AtomicBool,
    aborted: AtomicBool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            state: Mutex::new(PlaybackState::NotStarted),
            changed: Condvar::new(),
            recording: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }
}

impl SessionState {
    pub fn report(&self, state: PlaybackState) {
        let mut current = self.state.lock();
        if *current != state {
            log::trace!("playback {:?} -> {state:?}", *current);
            *current = state;
            self.changed.notify_all();
        }
    }

    pub fn get(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// The input stream is running; playback may send its first event.
    pub fn report_recording(&self) {
        let _state = self.state.lock();
        self.recording.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Capture failed; playback should shut down early.
    pub fn abort(&self) {
        let _state = self.state.lock();
        self.aborted.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the capture side to report recording or to
    /// abort. Returns whether it is recording.
    pub fn wait_recording(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed.wait_while_for(
            &mut state,
            |_| !self.is_recording() && !self.is_aborted(),
            timeout,
        );
        self.is_recording()
    }

    /// Block until playback has started (or ended without starting).
    pub fn wait_started(&self) -> PlaybackState {
        let mut state = self.state.lock();
        self.changed
            .wait_while(&mut state, |s| *s == PlaybackState::NotStarted);
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_timeout_elapses_without_trigger() {
        let stop = StopSignal::new();
        let t0 = Instant::now();
        assert!(!stop.wait_timeout(Duration::from_millis(30)));
        assert!(t0.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn trigger_wakes_a_sleeper() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let t0 = Instant::now();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });
        assert!(stop.wait_timeout(Duration::from_secs(5)));
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert!(stop.is_set());
        waker.join().unwrap();
    }

    #[test]
    fn wait_started_returns_first_reported_state() {
        let session = SessionState::default();
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                session.report(PlaybackState::Playing);
            });
            assert_eq!(session.wait_started(), PlaybackState::Playing);
        });
        session.report(PlaybackState::Draining);
        assert!(session.get().is_finished());
    }

    #[test]
    fn wait_recording_wakes_on_report_or_abort() {
        let session = SessionState::default();
        assert!(!session.wait_recording(Duration::from_millis(10)));

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                session.report_recording();
            });
            let t0 = Instant::now();
            assert!(session.wait_recording(Duration::from_secs(5)));
            assert!(t0.elapsed() < Duration::from_secs(1));
        });

        let failed = SessionState::default();
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                failed.abort();
            });
            let t0 = Instant::now();
            assert!(!failed.wait_recording(Duration::from_secs(5)));
            assert!(t0.elapsed() < Duration::from_secs(1));
            assert!(failed.is_aborted());
        });
    }
}
