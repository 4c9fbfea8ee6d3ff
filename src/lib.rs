//! # stem-mixer-core
//!
//! Runs stem separation jobs without blocking the caller and remixes the
//! separated stems with per-stem gains.

pub mod config;
pub mod error;
pub mod studio;
pub mod types;

pub mod core {
    pub mod audio;
    pub mod dsp;
    pub mod engine;
    pub mod mixer;
    pub mod orchestrator;
    pub mod session;
}

pub mod io {
    pub mod events;
    pub mod playback;
}

pub use crate::{
    config::{EngineConfig, MixConfig, StudioConfig},
    core::{
        audio::{probe_audio, read_audio, read_metadata, write_audio},
        engine::{SeparationEngine, SpleeterEngine, StemFile},
        mixer::{mix, ClipPolicy, StemMixer},
        orchestrator::{
            load_stem_files, JobHandle, JobState, JobStatus, SeparationJob,
            SeparationOrchestrator,
        },
        session::{MixResult, MixSession},
    },
    error::{Result, StemError},
    io::{
        events::{Command, Event},
        playback::{PlaybackSink, WavFileSink},
    },
    studio::Studio,
    types::{AudioBuffer, AudioFormat, AudioMetadata, GainVector, JobId, Stem, StemCount, StemSet},
};
