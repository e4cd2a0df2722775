//! Runtime settings, read from `SYNTH_*` environment variables plus the
//! directory given on the command line.

use crate::audio::StreamFormat;
use crate::engine::Strategy;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub midi_dir: PathBuf,
    /// Substring of the MIDI output port name.
    pub midi_port: String,
    /// Substring of the audio input device name; host default when unset.
    pub audio_device: Option<String>,
    pub format: StreamFormat,
    pub chunk_frames: usize,
    pub strategy: Strategy,
    pub xg_reset: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dir = std::env::args_os().nth(1).map(PathBuf::from);
        Self::load(|key| std::env::var(key).ok(), dir)
    }

    fn load(var: impl Fn(&str) -> Option<String>, dir: Option<PathBuf>) -> Result<Self> {
        let midi_dir = match dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("no MIDI directory given")?,
        };
        let xg_reset = var("SYNTH_XG_RESET")
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            midi_dir,
            midi_port: var("SYNTH_MIDI_PORT").unwrap_or_else(|| "MIDI".into()),
            audio_device: var("SYNTH_AUDIO_DEVICE").filter(|v| !v.is_empty()),
            format: StreamFormat {
                sample_rate: parse(&var, "SYNTH_SAMPLE_RATE", 48_000)?,
                channels: parse(&var, "SYNTH_CHANNELS", 2)?,
            },
            chunk_frames: parse(&var, "SYNTH_CHUNK", 2048)?,
            strategy: parse(&var, "SYNTH_STRATEGY", Strategy::Threaded)?,
            xg_reset,
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}")),
        None => Ok(default),
    }
}
