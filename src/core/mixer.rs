use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StemError},
    types::{AudioBuffer, Stem},
};

/// Interleaved samples summed per rayon task.
const MIX_CHUNK: usize = 16 * 1024;

/// What to do with summed samples that leave `[-1.0, 1.0]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPolicy {
    /// Clamp every sample to full scale.
    #[default]
    HardClip,
    /// Scale the whole mix down so its peak sits at full scale.
    NormalizePeak,
}

/// Combines stems into one buffer with per-stem gains.
#[derive(Clone, Copy, Debug, Default)]
pub struct StemMixer {
    clip: ClipPolicy,
}

impl StemMixer {
    pub fn new(clip: ClipPolicy) -> Self {
        Self { clip }
    }

    pub fn clip_policy(&self) -> ClipPolicy {
        self.clip
    }

    /// Scales stem `i` by `gains[i]` and sums all stems sample by sample.
    ///
    /// Stems shorter than the longest one are treated as silent past their end.
    /// Negative gains invert phase. The sum is then bounded by the mixer's
    /// [`ClipPolicy`].
    ///
    /// # Errors
    /// [`StemError::ShapeMismatch`] when `gains` and `stems` differ in length,
    /// [`StemError::NoStemsLoaded`] for an empty stem list and
    /// [`StemError::FormatMismatch`] when stems disagree on rate or channels.
    pub fn mix(&self, stems: &[Stem], gains: &[f32]) -> Result<AudioBuffer> {
        check_shape(stems, gains).inspect_err(|e| log::error!("Refusing to mix: {e}"))?;

        let format = stems[0].buffer.format();
        let out_len = stems.iter().map(|s| s.buffer.len()).max().unwrap_or(0);
        let mut out = vec![0.0f32; out_len];

        out.par_chunks_mut(MIX_CHUNK)
            .enumerate()
            .for_each(|(ci, chunk)| {
                let base = ci * MIX_CHUNK;
                for (stem, &gain) in stems.iter().zip(gains) {
                    let src = stem.samples();
                    if gain == 0.0 || base >= src.len() {
                        continue;
                    }
                    let end = (base + chunk.len()).min(src.len());
                    for (o, &s) in chunk.iter_mut().zip(&src[base..end]) {
                        *o += s * gain;
                    }
                }
            });

        apply_clip(&mut out, self.clip);

        AudioBuffer::new(format.sample_rate, format.channels, out)
    }
}

/// [`StemMixer::mix`] with the default hard-clip policy.
pub fn mix(stems: &[Stem], gains: &[f32]) -> Result<AudioBuffer> {
    StemMixer::default().mix(stems, gains)
}

fn check_shape(stems: &[Stem], gains: &[f32]) -> Result<()> {
    if stems.len() != gains.len() {
        return Err(StemError::ShapeMismatch {
            stems: stems.len(),
            gains: gains.len(),
        });
    }
    let first = stems.first().ok_or(StemError::NoStemsLoaded)?;
    let expected = first.buffer.format();

    match stems.iter().find(|s| s.buffer.format() != expected) {
        Some(odd) => Err(StemError::FormatMismatch {
            stem: odd.name.clone(),
            expected: expected.to_string(),
            found: odd.buffer.format().to_string(),
        }),
        None => Ok(()),
    }
}

fn apply_clip(samples: &mut [f32], clip: ClipPolicy) {
    match clip {
        ClipPolicy::HardClip => {
            samples
                .par_iter_mut()
                .for_each(|s| *s = s.clamp(-1.0, 1.0));
        }
        ClipPolicy::NormalizePeak => {
            let peak = samples
                .par_iter()
                .map(|s| s.abs())
                .reduce(|| 0.0f32, f32::max);
            if peak > 1.0 {
                samples.par_iter_mut().for_each(|s| *s /= peak);
            }
        }
    }
}
