use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::{core::audio::write_audio, error::Result, types::AudioBuffer};

/// Consumer of the current mix. Playback always starts from position 0;
/// transport state belongs to the sink.
pub trait PlaybackSink: Send {
    fn play(&mut self, mix: &AudioBuffer) -> Result<()>;
}

/// Hands the mix to an external player as a WAV file.
///
/// Each mix is written next to the target as `.part` and renamed over it, so
/// a player never opens a half-written file.
pub struct WavFileSink {
    path: PathBuf,
    _dir: Option<TempDir>,
}

impl WavFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _dir: None,
        }
    }

    /// Sink writing into a private temporary directory removed on drop.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("stem-mix").tempdir()?;
        Ok(Self {
            path: dir.path().join("mix.wav"),
            _dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PlaybackSink for WavFileSink {
    fn play(&mut self, mix: &AudioBuffer) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("part");
        write_audio(&tmp, mix)?;

        if self.path.exists() {
            fs::remove_file(&self.path).ok();
        }
        fs::rename(&tmp, &self.path)?;

        log::debug!("Wrote mix ({:?}) to {:?}", mix, self.path);
        Ok(())
    }
}
