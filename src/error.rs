//! Errors raised while recording a single file.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MIDI output: {0}")]
    MidiOut(String),

    #[error("audio input: {0}")]
    AudioIn(String),

    #[error("malformed MIDI file: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("recording cancelled")]
    Cancelled,
}

impl Error {
    /// Only a user-forced stop ends the whole batch; everything else skips
    /// the current file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
