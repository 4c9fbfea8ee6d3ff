#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use crossbeam_channel::Receiver;
use stem_mixer_core::{
    write_audio, AudioBuffer, Event, SeparationEngine, Stem, StemCount, StemFile,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(10);

pub fn buffer(channels: u16, samples: Vec<f32>) -> AudioBuffer {
    AudioBuffer::new(44_100, channels, samples).unwrap()
}

pub fn stem(name: &str, samples: Vec<f32>) -> Stem {
    Stem::new(name, buffer(1, samples))
}

/// Stereo WAV of `frames` frames holding `value` on the left and `-value` on the right.
pub fn write_constant_wav(path: &Path, sample_rate: u32, frames: usize, value: f32) {
    let samples = (0..frames).flat_map(|_| [value, -value]).collect();
    let audio = AudioBuffer::new(sample_rate, 2, samples).unwrap();
    write_audio(path, &audio).unwrap();
}

pub fn recv(events: &Receiver<Event>) -> Event {
    events
        .recv_timeout(RECV_TIMEOUT)
        .expect("timed out waiting for event")
}

/// Receives events until a terminal one, returning everything seen.
pub fn recv_until_terminal(events: &Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = recv(events);
        let done = event.is_terminal();
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Writes one constant-valued stereo WAV per stem; stem `i` holds `0.1 * (i + 1)`.
pub struct FakeEngine {
    pub frames: usize,
    pub sample_rate: u32,
    pub progress: Vec<u8>,
    pub calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            sample_rate: 44_100,
            progress: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn stem_value(index: usize) -> f32 {
        0.1 * (index + 1) as f32
    }
}

impl SeparationEngine for FakeEngine {
    fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        stems: StemCount,
        progress: &dyn Fn(u8),
    ) -> anyhow::Result<Vec<StemFile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for &p in &self.progress {
            progress(p);
        }

        let track = input.file_stem().unwrap().to_string_lossy().to_string();
        let dir = output_dir.join(track);
        std::fs::create_dir_all(&dir)?;

        let mut files = Vec::new();
        for (i, name) in stems.stem_names().iter().enumerate() {
            let path: PathBuf = dir.join(format!("{name}.wav"));
            write_constant_wav(&path, self.sample_rate, self.frames, Self::stem_value(i));
            files.push(StemFile {
                name: name.to_string(),
                path,
            });
        }
        Ok(files)
    }
}

pub struct FailingEngine;

impl SeparationEngine for FailingEngine {
    fn separate(
        &self,
        _input: &Path,
        _output_dir: &Path,
        _stems: StemCount,
        _progress: &dyn Fn(u8),
    ) -> anyhow::Result<Vec<StemFile>> {
        anyhow::bail!("model weights not found")
    }
}
