//! Standard MIDI File loading.
//!
//! Flattens every track of a format 0/1 file into one ordered list of
//! events with wall-clock deltas, following the file's tempo map. Meta
//! events stay in the list so their delta still advances the clock, but
//! they are never sent to the synth.

use crate::error::{Error, Result};
use midly::{Format, MetaMessage, Smf, Timing, TrackEventKind, live::LiveEvent};
use std::path::Path;
use std::time::Duration;

/// Microseconds per quarter note until the first Set Tempo event.
const DEFAULT_TEMPO: u32 = 500_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Raw bytes for the output device.
    Sound(Vec<u8>),
    /// Time marker only.
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    /// Time since the previous event.
    pub delta: Duration,
    pub message: Message,
}

impl MidiEvent {
    pub fn is_sound(&self) -> bool {
        matches!(self.message, Message::Sound(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Song {
    events: Vec<MidiEvent>,
}

impl Song {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data).map_err(|e| Error::Malformed(e.to_string()))?;
        if smf.header.format == Format::Sequential {
            return Err(Error::Malformed(
                "format 2 files have no single timeline to play".into(),
            ));
        }

        // Merge all tracks on absolute ticks; the sort is stable so
        // simultaneous events keep their track order.
        let mut merged = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for ev in track {
                tick += u64::from(ev.delta.as_int());
                merged.push((tick, ev.kind));
            }
        }
        merged.sort_by_key(|(tick, _)| *tick);

        let mut tempo = DEFAULT_TEMPO;
        let mut last_tick = 0u64;
        let mut events = Vec::with_capacity(merged.len());
        for (tick, kind) in merged {
            let secs = (tick - last_tick) as f64 * seconds_per_tick(smf.header.timing, tempo);
            last_tick = tick;

            if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = kind {
                tempo = t.as_int();
            }
            events.push(MidiEvent {
                delta: Duration::from_secs_f64(secs),
                message: encode(kind)?,
            });
        }

        Ok(Self { events })
    }

    pub fn from_events(events: Vec<MidiEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Nominal length: the sum of every delta.
    pub fn duration(&self) -> Duration {
        self.events.iter().map(|e| e.delta).sum()
    }

    /// Transmission offset of each event from the start of playback.
    pub fn offsets(&self) -> Vec<Duration> {
        self.events
            .iter()
            .scan(Duration::ZERO, |at, e| {
                *at += e.delta;
                Some(*at)
            })
            .collect()
    }
}

fn seconds_per_tick(timing: Timing, tempo: u32) -> f64 {
    match timing {
        Timing::Metrical(tpq) => f64::from(tempo) / 1e6 / f64::from(tpq.as_int().max(1)),
        Timing::Timecode(fps, sub) => 1.0 / (f64::from(fps.as_f32()) * f64::from(sub.max(1))),
    }
}

fn encode(kind: TrackEventKind<'_>) -> Result<Message> {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            let mut bytes = Vec::with_capacity(3);
            LiveEvent::Midi { channel, message }
                .write_std(&mut bytes)
                .map_err(|e| Error::Malformed(e.to_string()))?;
            Ok(Message::Sound(bytes))
        }
        TrackEventKind::SysEx(data) => {
            let mut bytes = Vec::with_capacity(data.len() + 2);
            bytes.push(0xF0);
            bytes.extend_from_slice(data);
            if bytes.last() != Some(&0xF7) {
                bytes.push(0xF7);
            }
            Ok(Message::Sound(bytes))
        }
        TrackEventKind::Escape(_) | TrackEventKind::Meta(_) => Ok(Message::Meta),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use midly::num::{u4, u7, u15, u24, u28};
    use midly::{Header, MidiMessage, TrackEvent};

    fn note(delta: u32, on: bool, key: u8) -> TrackEvent<'static> {
        let message = if on {
            MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(100) }
        } else {
            MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) }
        };
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel: u4::new(0), message },
        }
    }

    fn meta(delta: u32, msg: MetaMessage<'static>) -> TrackEvent<'static> {
        TrackEvent { delta: u28::new(delta), kind: TrackEventKind::Meta(msg) }
    }

    pub(crate) fn write_smf(format: Format, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(format, Timing::Metrical(u15::new(480))));
        smf.tracks = tracks;
        let mut out = Vec::new();
        smf.write_std(&mut out).unwrap();
        out
    }

    /// One note held for `held` quarter notes at 120 bpm (0.5 s each).
    pub(crate) fn single_note(held: u32) -> Vec<u8> {
        write_smf(
            Format::SingleTrack,
            vec![vec![
                note(0, true, 60),
                note(480 * held, false, 60),
                meta(0, MetaMessage::EndOfTrack),
            ]],
        )
    }

    fn secs(d: Duration) -> f64 {
        d.as_secs_f64()
    }

    #[test]
    fn default_tempo_is_120_bpm() {
        let song = Song::parse(&single_note(2)).unwrap();
        assert_eq!(song.events().len(), 3);
        assert!((secs(song.duration()) - 1.0).abs() < 1e-9);
        assert!(song.events()[0].is_sound());
        assert_eq!(song.events()[0].message, Message::Sound(vec![0x90, 60, 100]));
        assert!(!song.events()[2].is_sound());
    }

    #[test]
    fn tempo_changes_apply_to_following_ticks() {
        let data = write_smf(
            Format::SingleTrack,
            vec![vec![
                meta(0, MetaMessage::Tempo(u24::new(250_000))),
                note(480, true, 60),
                meta(0, MetaMessage::Tempo(u24::new(1_000_000))),
                note(480, false, 60),
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );
        let song = Song::parse(&data).unwrap();
        let deltas: Vec<f64> = song.events().iter().map(|e| secs(e.delta)).collect();
        assert!((deltas[1] - 0.25).abs() < 1e-9);
        assert!((deltas[3] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_tracks_are_merged_in_time_order() {
        let data = write_smf(
            Format::Parallel,
            vec![
                vec![
                    meta(0, MetaMessage::Tempo(u24::new(500_000))),
                    meta(960, MetaMessage::EndOfTrack),
                ],
                vec![note(0, true, 60), note(480, false, 60), meta(0, MetaMessage::EndOfTrack)],
                vec![note(240, true, 64), note(480, false, 64), meta(0, MetaMessage::EndOfTrack)],
            ],
        );
        let song = Song::parse(&data).unwrap();
        let sounds: Vec<_> = song
            .events()
            .iter()
            .filter_map(|e| match &e.message {
                Message::Sound(b) => Some((b[0], b[1])),
                Message::Meta => None,
            })
            .collect();
        assert_eq!(sounds, vec![(0x90, 60), (0x90, 64), (0x80, 60), (0x80, 64)]);
        assert!((secs(song.duration()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn offsets_accumulate_deltas() {
        let song = Song::parse(&single_note(3)).unwrap();
        let offsets = song.offsets();
        let mut running = Duration::ZERO;
        for (event, offset) in song.events().iter().zip(&offsets) {
            running += event.delta;
            assert_eq!(*offset, running);
        }
        assert_eq!(offsets.last().copied(), Some(song.duration()));
    }

    #[test]
    fn sequential_files_are_rejected() {
        let data = write_smf(Format::Sequential, vec![vec![meta(0, MetaMessage::EndOfTrack)]]);
        assert!(matches!(Song::parse(&data), Err(Error::Malformed(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(Song::parse(b"RIFF nope"), Err(Error::Malformed(_))));
    }

    #[test]
    fn sysex_is_framed_for_sending() {
        let data = write_smf(
            Format::SingleTrack,
            vec![vec![
                TrackEvent {
                    delta: u28::new(0),
                    kind: TrackEventKind::SysEx(&[0x7E, 0x7F, 0x09, 0x01, 0xF7]),
                },
                meta(0, MetaMessage::EndOfTrack),
            ]],
        );
        let song = Song::parse(&data).unwrap();
        assert_eq!(
            song.events()[0].message,
            Message::Sound(crate::reset::GM_RESET.to_vec())
        );
    }
}
