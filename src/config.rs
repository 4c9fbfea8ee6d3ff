use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{core::mixer::ClipPolicy, error::Result, types::StemCount};

/// Overrides [`EngineConfig::program`].
pub const ENV_SPLEETER: &str = "STEM_MIXER_SPLEETER";
/// Overrides [`MixConfig::debounce_ms`].
pub const ENV_DEBOUNCE_MS: &str = "STEM_MIXER_DEBOUNCE_MS";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executable invoked for separation.
    pub program: String,
    /// Output codec passed to the engine.
    pub codec: String,
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "spleeter".into(),
            codec: "wav".into(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    pub clip: ClipPolicy,
    /// Recompute on a background worker after gain changes.
    pub background: bool,
    /// Delay between the first gain change of a burst and the worker's mix.
    pub debounce_ms: u64,
}

impl MixConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            clip: ClipPolicy::HardClip,
            background: true,
            debounce_ms: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub engine: EngineConfig,
    pub mix: MixConfig,
    /// Gain layout used before the first separation request.
    pub stem_count: StemCount,
    /// Where stems are written; `None` means next to the source file.
    pub output_dir: Option<PathBuf>,
}

impl StudioConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `STEM_MIXER_*` names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(program) = lookup(ENV_SPLEETER).filter(|p| !p.is_empty()) {
            self.engine.program = program;
        }
        if let Some(raw) = lookup(ENV_DEBOUNCE_MS) {
            match raw.trim().parse() {
                Ok(ms) => self.mix.debounce_ms = ms,
                Err(_) => log::warn!("Ignoring {ENV_DEBOUNCE_MS}={raw:?}: not a number"),
            }
        }
        self
    }
}
