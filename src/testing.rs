//! Device doubles for unit tests.

use crate::audio::{AudioSource, StreamFormat};
use crate::error::{Error, Result};
use crate::midi::MidiSink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Sent {
    messages: Vec<(Instant, Vec<u8>)>,
    closed: bool,
}

/// Shared record of everything a fake synth received.
#[derive(Clone, Default)]
pub struct SynthLog {
    inner: Arc<Mutex<Sent>>,
}

impl SynthLog {
    pub fn sink(&self) -> Box<dyn MidiSink> {
        Box::new(RecordingSynth {
            log: self.clone(),
            fail_after: None,
            sent: 0,
        })
    }

    /// A sink that accepts `ok` messages and rejects everything after.
    pub fn failing_sink(&self, ok: usize) -> Box<dyn MidiSink> {
        Box::new(RecordingSynth {
            log: self.clone(),
            fail_after: Some(ok),
            sent: 0,
        })
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .messages
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, msg: &[u8]) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|(_, m)| m == msg)
            .count()
    }

    pub fn first_sent_at(&self, msg: &[u8]) -> Option<Instant> {
        self.inner
            .lock()
            .messages
            .iter()
            .find(|(_, m)| m == msg)
            .map(|(at, _)| *at)
    }

    pub fn all_sound_off_count(&self) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|(_, m)| m.len() == 3 && m[0] & 0xF0 == 0xB0 && m[1] == 0x78)
            .count()
    }

    pub fn closed(&self) -> bool {
        self.inner.lock().closed
    }
}

struct RecordingSynth {
    log: SynthLog,
    fail_after: Option<usize>,
    sent: usize,
}

impl MidiSink for RecordingSynth {
    fn send(&mut self, msg: &[u8]) -> Result<()> {
        if self.fail_after.is_some_and(|n| self.sent >= n) {
            return Err(Error::MidiOut("device unplugged".into()));
        }
        let mut inner = self.log.inner.lock();
        if inner.closed {
            return Err(Error::MidiOut("send after close".into()));
        }
        inner.messages.push((Instant::now(), msg.to_vec()));
        self.sent += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.log.inner.lock().closed = true;
    }
}

/// Produces frames in real time from `start()`. Every sample of frame `n`
/// is `n as i16`.
pub struct SimulatedSource {
    format: StreamFormat,
    started: Option<Instant>,
    consumed: usize,
    starts: Vec<Instant>,
    stops: usize,
    reads: usize,
    start_delay: Duration,
    fail_start: bool,
    fail_read: Option<usize>,
}

impl SimulatedSource {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            started: None,
            consumed: 0,
            starts: Vec::new(),
            stops: 0,
            reads: 0,
            start_delay: Duration::ZERO,
            fail_start: false,
            fail_read: None,
        }
    }

    /// `start()` takes this long, like a device that has to spin up.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Every `start()` fails.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// The `n`th read (1-based) and every one after it fails.
    pub fn failing_read(mut self, n: usize) -> Self {
        self.fail_read = Some(n);
        self
    }

    pub fn starts(&self) -> &[Instant] {
        &self.starts
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    fn produced(&self) -> usize {
        self.started.map_or(0, |t| {
            (t.elapsed().as_secs_f64() * f64::from(self.format.sample_rate)) as usize
        })
    }
}

impl AudioSource for SimulatedSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::AudioIn("no such device".into()));
        }
        thread::sleep(self.start_delay);
        // Stamped once the stream would be running.
        let now = Instant::now();
        self.started = Some(now);
        self.consumed = 0;
        self.starts.push(now);
        Ok(())
    }

    fn available(&self) -> usize {
        self.produced().saturating_sub(self.consumed)
    }

    fn read(&mut self, frames: usize) -> Result<Vec<i16>> {
        if self.started.is_none() {
            return Err(Error::AudioIn("read before start".into()));
        }
        self.reads += 1;
        if self.fail_read.is_some_and(|n| self.reads >= n) {
            return Err(Error::AudioIn("unplugged".into()));
        }
        loop {
            let ready = self.available();
            if ready >= frames {
                break;
            }
            thread::sleep(self.format.frames_to_duration(frames - ready));
        }
        let channels = self.format.channels as usize;
        let chunk = (self.consumed..self.consumed + frames)
            .flat_map(|n| std::iter::repeat_n(n as i16, channels))
            .collect();
        self.consumed += frames;
        Ok(chunk)
    }

    fn stop(&mut self) -> Result<()> {
        self.started = None;
        self.stops += 1;
        Ok(())
    }
}
