use std::{fs::File, io::ErrorKind, path::Path};

use anyhow::Context;
use hound::WavWriter;
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::{
    error::Result,
    types::{AudioBuffer, AudioMetadata},
};

/// Sample width assumed when the container does not declare a bit depth (e.g. MP3).
pub const DEFAULT_SAMPLE_WIDTH: u16 = 2;

/// What the container header says about the default track, without decoding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioProbe {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u32>,
    pub n_frames: Option<u64>,
}

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file: File =
        File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    Ok(probed.format)
}

fn default_params(format: &dyn FormatReader) -> Result<(u32, CodecParameters)> {
    let track = format.default_track().context("No default track found")?;
    Ok((track.id, track.codec_params.clone()))
}

/// Opens `path` and reads the default track's header. Fails if the file is
/// missing or not a recognised audio container.
pub fn probe_audio<P: AsRef<Path>>(path: P) -> Result<AudioProbe> {
    let format = open_format(path.as_ref())?;
    let (_, params) = default_params(&*format)?;

    Ok(AudioProbe {
        sample_rate: params.sample_rate,
        channels: params.channels.map(|c| c.count() as u16),
        bits_per_sample: params.bits_per_sample,
        n_frames: params.n_frames,
    })
}

/// Duration and format of `path`. Uses the header when it is complete and
/// falls back to a full decode otherwise.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<AudioMetadata> {
    let path = path.as_ref();
    let probe = probe_audio(path)?;
    let sample_width = probe
        .bits_per_sample
        .map(|bits| bits.div_ceil(8) as u16)
        .unwrap_or(DEFAULT_SAMPLE_WIDTH);

    if let (Some(rate), Some(channels), Some(frames)) =
        (probe.sample_rate, probe.channels, probe.n_frames)
    {
        if rate > 0 {
            return Ok(AudioMetadata {
                duration: frames as f64 / rate as f64,
                channels,
                sample_width,
                sample_rate: rate,
            });
        }
    }

    log::debug!("Header of {:?} is incomplete, decoding to measure it", path);
    let audio = read_audio(path)?;
    Ok(AudioMetadata {
        duration: audio.duration().as_secs_f64(),
        channels: audio.channels(),
        sample_width,
        sample_rate: audio.sample_rate(),
    })
}

pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let path: &Path = path.as_ref();

    let mut format = open_format(path)?;
    let (track_id, params) = default_params(&*format)?;

    let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = params.sample_rate.unwrap_or(0);
    let mut channels: u16 = params.channels.map(|c| c.count() as u16).unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupt packet in {:?}: {}", path, msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    log::debug!(
        "Read audio {:?}: sample_rate={}, channels={}, samples={}",
        path,
        sample_rate,
        channels,
        samples.len()
    );

    AudioBuffer::new(sample_rate, channels, samples)
}

/// Writes `audio` as 16-bit PCM WAV, clamping out-of-range samples.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioBuffer) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for sample in audio.samples() {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}
