//! Walks a directory of MIDI files and records each one that has no output
//! yet.

use crate::audio::AudioSource;
use crate::capture::CaptureBuffer;
use crate::engine::Engine;
use crate::error::Result;
use crate::levels::{Levels, PostProcess};
use crate::midi::SynthPort;
use std::fs;
use std::path::{Path, PathBuf};

/// Records one MIDI file.
pub trait Recorder {
    fn record(&mut self, midi: &Path) -> Result<CaptureBuffer>;
}

/// The real thing: a fresh synth connection per file, one shared input.
pub struct Rig<'a, A: AudioSource> {
    pub engine: &'a Engine,
    pub port: SynthPort,
    pub source: A,
}

impl<A: AudioSource> Recorder for Rig<'_, A> {
    fn record(&mut self, midi: &Path) -> Result<CaptureBuffer> {
        let sink = self.port.open()?;
        self.engine.record(midi, Box::new(sink), &mut self.source)
    }
}

#[derive(Debug, Default)]
pub struct Summary {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: Vec<(PathBuf, String)>,
    pub max_peak: Option<(f64, PathBuf)>,
    pub clipped: Vec<PathBuf>,
    pub cancelled: bool,
}

impl Summary {
    fn add(&mut self, file: &Path, levels: Levels) {
        self.recorded += 1;
        log::info!("peak: {:.4}", levels.peak);
        if levels.clipped {
            log::warn!("Audio clipped. Adjust synth output");
            self.clipped.push(file.to_path_buf());
        }
        if self.max_peak.as_ref().is_none_or(|(p, _)| levels.peak > *p) {
            self.max_peak = Some((levels.peak, file.to_path_buf()));
        }
    }

    pub fn report(&self) {
        log::info!(
            "{} recorded, {} skipped, {} failed",
            self.recorded,
            self.skipped,
            self.failed.len()
        );
        match &self.max_peak {
            Some((peak, file)) => log::info!("Max peak: {peak:.4} - {}", file.display()),
            None => log::info!("Max peak: none"),
        }
        if !self.clipped.is_empty() {
            log::warn!("Files that clipped:");
            for file in &self.clipped {
                log::warn!("  {}", file.display());
            }
        }
        for (file, error) in &self.failed {
            log::error!("  {}: {error}", file.display());
        }
        if self.cancelled {
            log::warn!("Run cancelled");
        }
    }
}

/// All `.mid` files under `root`, sorted, any extension case.
pub fn find_midi_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            // Symlinked directories are not followed, so loops cannot recurse.
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("mid"))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

pub fn output_path(midi: &Path) -> PathBuf {
    midi.with_extension("wav")
}

pub struct Batch<R, P> {
    recorder: R,
    post: P,
}

impl<R: Recorder, P: PostProcess> Batch<R, P> {
    pub fn new(recorder: R, post: P) -> Self {
        Self { recorder, post }
    }

    /// Record every file under `root`. Per-file failures are collected in the
    /// summary; only cancellation ends the run early.
    pub fn run(&mut self, root: &Path) -> std::io::Result<Summary> {
        let mut summary = Summary::default();

        for midi in find_midi_files(root)? {
            let out = output_path(&midi);
            if out.exists() {
                log::info!(
                    "File \"{}\" already exists. skipping \"{}\"",
                    out.display(),
                    midi.display()
                );
                summary.skipped += 1;
                continue;
            }

            let recorded = self
                .recorder
                .record(&midi)
                .and_then(|buffer| {
                    if buffer.is_empty() {
                        log::warn!("Nothing was recorded for \"{}\"", midi.display());
                    }
                    self.post.process(buffer, &out)
                });
            if recorded.is_err() && out.exists() {
                // A half-written output would be skipped on every later run.
                if let Err(e) = fs::remove_file(&out) {
                    log::warn!("removing partial \"{}\": {e}", out.display());
                }
            }
            match recorded {
                Ok(levels) => summary.add(&midi, levels),
                Err(e) if e.is_fatal() => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    log::error!("Exception with file: \"{}\": {e}", midi.display());
                    summary.failed.push((midi, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}
