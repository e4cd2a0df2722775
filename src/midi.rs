//! MIDI output: the sink the playback task writes to, and the `midir` port
//! it is opened from.

use crate::error::{Error, Result};
use anyhow::{Context, anyhow};
use midir::{MidiOutput, MidiOutputConnection};

const CLIENT_NAME: &str = "synth-recorder";

/// Anything that accepts raw MIDI bytes.
pub trait MidiSink: Send {
    fn send(&mut self, msg: &[u8]) -> Result<()>;

    /// Release the device. Further sends fail.
    fn close(&mut self);
}

/// A `midir` output port, remembered by name so a fresh connection can be
/// opened for every file.
#[derive(Debug, Clone)]
pub struct SynthPort {
    name: String,
}

impl SynthPort {
    /// Pick the first output whose name contains `wanted` (case-insensitive),
    /// falling back to the first port.
    pub fn select(wanted: &str) -> anyhow::Result<Self> {
        let out = MidiOutput::new(CLIENT_NAME).context("create MIDI client")?;
        let names: Vec<String> = out
            .ports()
            .iter()
            .filter_map(|p| out.port_name(p).ok())
            .collect();

        let needle = wanted.to_lowercase();
        let chosen = names
            .iter()
            .find(|n| n.to_lowercase().contains(&needle))
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| anyhow!("no MIDI output ports"))?;

        for name in &names {
            let mark = if *name == chosen { "->" } else { "  " };
            log::info!("{mark} {name}");
        }
        Ok(Self { name: chosen })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(&self) -> Result<MidirSink> {
        let out = MidiOutput::new(CLIENT_NAME).map_err(|e| Error::MidiOut(e.to_string()))?;
        let port = out
            .ports()
            .into_iter()
            .find(|p| out.port_name(p).is_ok_and(|n| n == self.name))
            .ok_or_else(|| Error::MidiOut(format!("port {} disappeared", self.name)))?;
        let conn = out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| Error::MidiOut(format!("connect {}: {e}", self.name)))?;

        log::debug!("🎹 Connected to {}", self.name);
        Ok(MidirSink { conn: Some(conn) })
    }
}

pub struct MidirSink {
    conn: Option<MidiOutputConnection>,
}

impl MidiSink for MidirSink {
    fn send(&mut self, msg: &[u8]) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::MidiOut("send after close".into()))?;
        conn.send(msg).map_err(|e| Error::MidiOut(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
    }
}

impl Drop for MidirSink {
    fn drop(&mut self) {
        self.close();
    }
}
