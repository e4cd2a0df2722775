mod audio;
mod batch;
mod capture;
mod config;
mod engine;
mod error;
mod levels;
mod midi;
mod playback;
mod reset;
mod song;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use env_logger::Env;

use crate::audio::CpalSource;
use crate::batch::{Batch, Rig};
use crate::config::Config;
use crate::engine::{Engine, StopSignal};
use crate::levels::WavOutput;
use crate::midi::SynthPort;
use crate::reset::ResetSequence;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!("🎼 Recording MIDI files under {:?}", config.midi_dir);

    let engine = Engine::new(config.strategy, StopSignal::new())
        .with_reset(ResetSequence::new(config.xg_reset))
        .with_chunk_frames(config.chunk_frames);
    let on_interrupt = engine.stop_signal().clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, shutting down");
        on_interrupt.trigger();
    })
    .context("install Ctrl-C handler")?;

    // Device acquisition failures end the run before any file is touched.
    let port = SynthPort::select(&config.midi_port)?;
    log::info!("🎹 Synthesizer: {}", port.name());
    let source = CpalSource::open(config.audio_device.as_deref(), config.format)
        .context("open audio input")?;

    let rig = Rig {
        engine: &engine,
        port,
        source,
    };

    let summary = Batch::new(rig, WavOutput).run(&config.midi_dir)?;
    summary.report();
    if summary.cancelled {
        std::process::exit(130);
    }
    Ok(())
}
