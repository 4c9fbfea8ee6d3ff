use anyhow::anyhow;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{
    error::Result,
    types::{AudioBuffer, AudioFormat},
};

/// Splits interleaved samples into one vector per channel.
pub fn deinterleave(interleaved: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let ch = channels.max(1) as usize;
    let frames = interleaved.len() / ch;
    let mut planar = vec![Vec::with_capacity(frames); ch];
    for frame in interleaved.chunks_exact(ch) {
        for (c, &s) in frame.iter().enumerate() {
            planar[c].push(s);
        }
    }
    planar
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
    out
}

pub fn upmix_to_stereo(mono: &[f32]) -> Vec<f32> {
    mono.iter().flat_map(|&x| [x, x]).collect()
}

pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|chunk| chunk.iter().copied().sum::<f32>() / channels as f32)
        .collect()
}

/// Resamples `audio` to `target_rate` in one pass over the whole buffer.
pub fn resample(audio: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    if audio.sample_rate() == target_rate {
        return Ok(audio.clone());
    }
    let frames = audio.frames();
    if frames == 0 {
        return AudioBuffer::new(target_rate, audio.channels(), Vec::new());
    }

    log::debug!(
        "Resampling {} frames from {} Hz to {} Hz",
        frames,
        audio.sample_rate(),
        target_rate
    );

    let ratio = target_rate as f64 / audio.sample_rate() as f64;
    let planar = deinterleave(audio.samples(), audio.channels());
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        frames,
        audio.channels() as usize,
    )
    .map_err(|e| anyhow!("Failed to create resampler: {e}"))?;

    let mut out = resampler
        .process(&planar, None)
        .map_err(|e| anyhow!("Resampling failed: {e}"))?;

    // Output starts `delay` frames late; flush the tail, then cut the delay so
    // a resampled stem stays aligned with the others.
    let delay = resampler.output_delay();
    let wanted = (frames as f64 * ratio).round() as usize;
    while out[0].len() < delay + wanted {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| anyhow!("Resampling failed: {e}"))?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, rest) in out.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }
    for channel in out.iter_mut() {
        channel.truncate(delay + wanted);
        channel.drain(..delay.min(channel.len()));
    }

    AudioBuffer::new(target_rate, audio.channels(), interleave(&out))
}

/// Converts `audio` to `target`: sample rate first, then channel layout.
pub fn conform(audio: &AudioBuffer, target: AudioFormat) -> Result<AudioBuffer> {
    if audio.format() == target {
        return Ok(audio.clone());
    }

    let resampled = resample(audio, target.sample_rate)?;
    let samples = match (resampled.channels(), target.channels) {
        (1, 2) => upmix_to_stereo(resampled.samples()),
        (from, 1) if from != 1 => downmix_to_mono(resampled.samples(), from),
        _ => return Ok(resampled),
    };

    AudioBuffer::new(target.sample_rate, target.channels, samples)
}
