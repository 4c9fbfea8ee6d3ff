use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{anyhow, Context, Result};

use crate::{config::EngineConfig, types::StemCount};

/// Stem file written by an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StemFile {
    pub name: String,
    pub path: PathBuf,
}

/// Black-box source separation.
///
/// Implementations write one audio file per stem into `output_dir` and return
/// them in the order given by [`StemCount::stem_names`]. `progress` may be
/// called with percentages when the engine can measure them; engines that
/// cannot must not call it.
pub trait SeparationEngine: Send + Sync {
    fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        stems: StemCount,
        progress: &dyn Fn(u8),
    ) -> Result<Vec<StemFile>>;
}

/// Runs the `spleeter` command-line tool as a child process.
///
/// Spleeter writes `<output_dir>/<input file stem>/<stem>.<codec>`.
pub struct SpleeterEngine {
    config: EngineConfig,
}

impl SpleeterEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Paths spleeter produces for `input`, in stem order.
    pub fn stem_files(&self, input: &Path, output_dir: &Path, stems: StemCount) -> Vec<StemFile> {
        let track = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let dir = output_dir.join(track);

        stems
            .stem_names()
            .iter()
            .map(|name| StemFile {
                name: (*name).to_string(),
                path: dir.join(format!("{name}.{}", self.config.codec)),
            })
            .collect()
    }
}

impl SeparationEngine for SpleeterEngine {
    fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        stems: StemCount,
        _progress: &dyn Fn(u8),
    ) -> Result<Vec<StemFile>> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output dir {:?}", output_dir))?;

        log::info!(
            "Running {} ({}) on {:?} into {:?}",
            self.config.program,
            stems.model_name(),
            input,
            output_dir
        );

        let output = Command::new(&self.config.program)
            .arg("separate")
            .arg("-p")
            .arg(stems.model_name())
            .arg("-c")
            .arg(&self.config.codec)
            .arg("-o")
            .arg(output_dir)
            .args(&self.config.extra_args)
            .arg(input)
            .output()
            .with_context(|| format!("Failed to run `{}`", self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(anyhow!(
                "`{}` exited with {}: {}",
                self.config.program,
                output.status,
                tail.join(" | ")
            ));
        }

        Ok(self.stem_files(input, output_dir, stems))
    }
}
