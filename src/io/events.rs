//! Messages exchanged with the presentation layer.
//!
//! The presentation layer sends [`Command`]s into a
//! [`Studio`](crate::studio::Studio) and receives [`Event`]s back. Neither
//! side calls into the other directly.

use std::{path::PathBuf, sync::Arc};

use crossbeam_channel::Sender;

use crate::{
    core::session::MixResult,
    types::{AudioMetadata, JobId, StemSet},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    RequestSeparation { path: PathBuf, stem_count: u8 },
    /// `gain` is a linear multiplier for stem `index`.
    SetGain { index: usize, gain: f32 },
    RequestCurrentMix,
    Shutdown,
}

#[derive(Clone, Debug)]
pub enum Event {
    SeparationStarted {
        job: JobId,
        percent: u8,
    },
    /// Only sent when the engine reports real progress.
    SeparationProgress {
        job: JobId,
        percent: u8,
    },
    SeparationSucceeded {
        job: JobId,
        stems: Arc<StemSet>,
        metadata: AudioMetadata,
    },
    SeparationFailed {
        job: JobId,
        reason: String,
    },
    MixReady {
        mix: Arc<MixResult>,
    },
    /// A command could not be applied (busy orchestrator, bad index, ...).
    CommandRejected {
        reason: String,
    },
}

impl Event {
    pub fn job(&self) -> Option<JobId> {
        match self {
            Event::SeparationStarted { job, .. }
            | Event::SeparationProgress { job, .. }
            | Event::SeparationSucceeded { job, .. }
            | Event::SeparationFailed { job, .. } => Some(*job),
            Event::MixReady { .. } | Event::CommandRejected { .. } => None,
        }
    }

    /// Progress bar value this event implies, if any.
    pub fn percent(&self) -> Option<u8> {
        match self {
            Event::SeparationStarted { percent, .. } | Event::SeparationProgress { percent, .. } => {
                Some(*percent)
            }
            Event::SeparationSucceeded { .. } => Some(100),
            Event::SeparationFailed { .. } => Some(0),
            Event::MixReady { .. } | Event::CommandRejected { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::SeparationSucceeded { .. } | Event::SeparationFailed { .. }
        )
    }
}

/// Sends `event`, treating a hung-up receiver as "nobody is listening any more".
pub(crate) fn emit(events: &Sender<Event>, event: Event) {
    if let Err(e) = events.send(event) {
        log::debug!("Dropping event, receiver is gone: {:?}", e.into_inner());
    }
}
