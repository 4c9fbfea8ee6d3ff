use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StemError};

/// Identifier handed out by the orchestrator, unique per process.
pub type JobId = u64;

/// Sample rate and channel layout shared by every stem of a set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// Decoded PCM audio: interleaved `f32` samples at full scale `[-1.0, 1.0]`.
///
/// The sample storage is shared, so cloning hands out another read-only view
/// of the same samples rather than copying them.
#[derive(Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    /// Builds a buffer, checking the format invariants.
    ///
    /// Fails with [`StemError::InvalidInput`] for a zero sample rate, a channel
    /// count other than 1 or 2, or a sample count that is not a whole number
    /// of frames.
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(StemError::InvalidInput("sample rate must be positive".into()));
        }
        if !(1..=2).contains(&channels) {
            return Err(StemError::InvalidInput(format!(
                "unsupported channel count {channels} (expected 1 or 2)"
            )));
        }
        if samples.len() % channels as usize != 0 {
            return Err(StemError::InvalidInput(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            sample_rate,
            channels,
            samples: samples.into(),
        })
    }

    pub fn silent(format: AudioFormat, frames: usize) -> Result<Self> {
        Self::new(
            format.sample_rate,
            format.channels,
            vec![0.0; frames * format.channels as usize],
        )
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Total interleaved sample count (frames × channels).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    /// Fresh, owned copy of the samples.
    pub fn to_vec(&self) -> Vec<f32> {
        self.samples.to_vec()
    }
}

// Sample dumps are useless in logs; print the shape instead.
impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Properties of the source file, reported once separation succeeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Seconds.
    pub duration: f64,
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
    pub sample_rate: u32,
}

impl fmt::Display for AudioMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Duration: {:.2} seconds, Channels: {}, Sample Width: {} bytes, Frame Rate: {} Hz",
            self.duration, self.channels, self.sample_width, self.sample_rate
        )
    }
}

/// Number of stems the separation engine is asked to produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StemCount {
    #[default]
    Two,
    Four,
    Five,
}

impl StemCount {
    pub const ALL: [StemCount; 3] = [StemCount::Two, StemCount::Four, StemCount::Five];

    pub fn count(self) -> usize {
        match self {
            StemCount::Two => 2,
            StemCount::Four => 4,
            StemCount::Five => 5,
        }
    }

    /// File names the engine writes, in stem order.
    pub fn stem_names(self) -> &'static [&'static str] {
        match self {
            StemCount::Two => &["vocals", "accompaniment"],
            StemCount::Four => &["vocals", "drums", "bass", "other"],
            StemCount::Five => &["vocals", "drums", "bass", "piano", "other"],
        }
    }

    /// Labels for gain controls, in stem order.
    pub fn display_names(self) -> &'static [&'static str] {
        match self {
            StemCount::Two => &["Vocals (singing voice)", "Accompaniment"],
            StemCount::Four => &["Vocals", "Drums", "Bass", "Other"],
            StemCount::Five => &["Vocals", "Drums", "Bass", "Piano", "Other"],
        }
    }

    /// Pretrained model identifier understood by spleeter.
    pub fn model_name(self) -> String {
        format!("spleeter:{}stems", self.count())
    }
}

impl TryFrom<u8> for StemCount {
    type Error = StemError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(StemCount::Two),
            4 => Ok(StemCount::Four),
            5 => Ok(StemCount::Five),
            n => Err(StemError::InvalidInput(format!(
                "unsupported stem count {n} (expected 2, 4 or 5)"
            ))),
        }
    }
}

impl From<StemCount> for u8 {
    fn from(value: StemCount) -> Self {
        value.count() as u8
    }
}

impl fmt::Display for StemCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stems", self.count())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stem {
    pub name: String,
    pub buffer: AudioBuffer,
}

impl Stem {
    pub fn new(name: impl Into<String>, buffer: AudioBuffer) -> Self {
        Self {
            name: name.into(),
            buffer,
        }
    }

    pub fn samples(&self) -> &[f32] {
        self.buffer.samples()
    }
}

/// Separated stems of one job. All stems share one [`AudioFormat`]; lengths may differ.
#[derive(Clone, Debug, PartialEq)]
pub struct StemSet {
    stems: Vec<Stem>,
}

impl StemSet {
    pub fn new(stems: Vec<Stem>) -> Result<Self> {
        let first = stems.first().ok_or(StemError::NoStemsLoaded)?;
        let expected = first.buffer.format();

        if let Some(odd) = stems.iter().find(|s| s.buffer.format() != expected) {
            return Err(StemError::FormatMismatch {
                stem: odd.name.clone(),
                expected: expected.to_string(),
                found: odd.buffer.format().to_string(),
            });
        }

        Ok(Self { stems })
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn format(&self) -> AudioFormat {
        self.stems[0].buffer.format()
    }

    pub fn get(&self, index: usize) -> Option<&Stem> {
        self.stems.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stem> {
        self.stems.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn as_slice(&self) -> &[Stem] {
        &self.stems
    }

    /// Length in frames of the longest stem.
    pub fn max_frames(&self) -> usize {
        self.stems.iter().map(|s| s.buffer.frames()).max().unwrap_or(0)
    }
}

/// Per-stem linear gain multipliers; index `i` applies to stem `i`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct GainVector {
    gains: Vec<f32>,
}

impl GainVector {
    pub const UNITY: f32 = 1.0;

    /// `len` unity gains.
    pub fn unity(len: usize) -> Self {
        Self {
            gains: vec![Self::UNITY; len],
        }
    }

    pub fn from_vec(gains: Vec<f32>) -> Result<Self> {
        if let Some(bad) = gains.iter().find(|g| !g.is_finite()) {
            return Err(StemError::InvalidInput(format!("gain {bad} is not finite")));
        }
        Ok(Self { gains })
    }

    /// Maps a control position in `[-100, 100]` to a multiplier; out-of-range
    /// positions are clamped.
    pub fn from_control(control: i32) -> f32 {
        control.clamp(-100, 100) as f32 / 100.0
    }

    pub fn len(&self) -> usize {
        self.gains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.gains.get(index).copied()
    }

    pub fn set(&mut self, index: usize, gain: f32) -> Result<()> {
        if !gain.is_finite() {
            return Err(StemError::InvalidInput(format!("gain {gain} is not finite")));
        }
        let len = self.gains.len();
        let slot = self
            .gains
            .get_mut(index)
            .ok_or(StemError::IndexOutOfRange { index, len })?;
        *slot = gain;
        Ok(())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.gains
    }
}

impl TryFrom<Vec<f32>> for GainVector {
    type Error = StemError;

    fn try_from(gains: Vec<f32>) -> Result<Self> {
        Self::from_vec(gains)
    }
}

impl From<GainVector> for Vec<f32> {
    fn from(value: GainVector) -> Self {
        value.gains
    }
}
