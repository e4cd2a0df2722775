//! Fixed SysEx/controller messages that put the synth into a known state.

pub const GM_RESET: &[u8] = &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];
pub const GS_RESET: &[u8] = &[
    0xF0, 0x41, 0x7F, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7,
];
pub const XG_RESET: &[u8] = &[0xF0, 0x43, 0x7F, 0x4C, 0x00, 0x00, 0x7E, 0x00, 0xF7];

/// Controller 120, "all sound off". Also silences notes held by the pedal.
const ALL_SOUND_OFF: u8 = 0x78;

pub const MIDI_CHANNELS: u8 = 16;

/// Ordered reset messages sent before and after every file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSequence {
    messages: &'static [&'static [u8]],
}

impl ResetSequence {
    pub const GS: ResetSequence = ResetSequence {
        messages: &[GM_RESET, GS_RESET],
    };
    pub const GS_XG: ResetSequence = ResetSequence {
        messages: &[GM_RESET, GS_RESET, XG_RESET],
    };

    pub fn new(with_xg: bool) -> Self {
        if with_xg { Self::GS_XG } else { Self::GS }
    }

    pub fn messages(self) -> impl Iterator<Item = &'static [u8]> {
        self.messages.iter().copied()
    }
}

impl Default for ResetSequence {
    fn default() -> Self {
        Self::GS
    }
}

/// One "all sound off" controller message per MIDI channel.
pub fn all_sound_off() -> impl Iterator<Item = [u8; 3]> {
    (0..MIDI_CHANNELS).map(|ch| [0xB0 | ch, ALL_SOUND_OFF, 0x00])
}
