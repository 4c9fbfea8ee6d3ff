//! Runs separation jobs off the caller's thread, one at a time.
//!
//! ```text
//! caller                     job thread                        events
//! ──────                     ──────────                        ──────
//! start() ──spawn──▶ Started(0) ───────────────────────────▶ SeparationStarted
//!   └ JobHandle      engine.separate()  ─progress?──────────▶ SeparationProgress
//!                    load stems (rayon), read metadata
//!                    release in-flight slot
//!                    Succeeded | Failed ────────────────────▶ terminal event
//! ```
//!
//! A `start` while a job is in flight is rejected with [`StemError::Busy`].

use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::{
    core::{
        audio::{probe_audio, read_audio, read_metadata},
        dsp::conform,
        engine::{SeparationEngine, StemFile},
    },
    error::{Result, StemError},
    io::events::{emit, Event},
    types::{AudioMetadata, JobId, Stem, StemCount, StemSet},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeparationJob {
    pub id: JobId,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub stem_count: StemCount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    /// 0..=100, never decreases.
    pub progress: u8,
    pub state: JobState,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.state != JobState::Running
    }
}

/// Handle to a started job. Owns the job thread.
///
/// [`JobHandle::wait`] joins the thread; dropping the handle detaches it. A
/// detached job still runs to completion and its events go to the channel,
/// or nowhere if the receiver is gone.
pub struct JobHandle {
    job: SeparationJob,
    status: Arc<Mutex<JobStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn job(&self) -> &SeparationJob {
        &self.job
    }

    pub fn status(&self) -> JobStatus {
        self.status.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status.lock().is_terminal()
    }

    /// Blocks until the job thread exits and returns the final status.
    pub fn wait(mut self) -> JobStatus {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Separation job {} thread panicked", self.job.id);
            }
        }
        self.status()
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                log::debug!("Detaching separation job {}", self.job.id);
            }
        }
    }
}

pub struct SeparationOrchestrator {
    engine: Arc<dyn SeparationEngine>,
    events: Sender<Event>,
    next_id: AtomicU64,
    in_flight: Arc<Mutex<Option<JobId>>>,
}

impl SeparationOrchestrator {
    pub fn new(engine: Arc<dyn SeparationEngine>, events: Sender<Event>) -> Self {
        Self {
            engine,
            events,
            next_id: AtomicU64::new(1),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Id of the job currently running, if any.
    pub fn running_job(&self) -> Option<JobId> {
        *self.in_flight.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.running_job().is_some()
    }

    /// Starts separating `input` into `stem_count` stems and returns at once.
    ///
    /// Stems go to `output_dir`, or next to `input` when `None`.
    ///
    /// # Errors
    /// [`StemError::InvalidInput`] for a stem count other than 2, 4 or 5 or an
    /// input that is not a readable audio file; [`StemError::Busy`] while
    /// another job is running.
    pub fn start(
        &self,
        input: impl AsRef<Path>,
        output_dir: Option<&Path>,
        stem_count: u8,
    ) -> Result<JobHandle> {
        let stem_count = StemCount::try_from(stem_count)?;
        let input = input.as_ref();

        if !input.is_file() {
            return Err(StemError::InvalidInput(format!("{:?} is not a file", input)));
        }
        probe_audio(input).map_err(|e| {
            StemError::InvalidInput(format!("{:?} is not a readable audio file: {e}", input))
        })?;

        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf(),
        };

        let id = {
            let mut slot = self.in_flight.lock();
            if let Some(running) = *slot {
                return Err(StemError::Busy(running));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Some(id);
            id
        };

        let job = SeparationJob {
            id,
            input: input.to_path_buf(),
            output_dir,
            stem_count,
        };
        let status = Arc::new(Mutex::new(JobStatus {
            progress: 0,
            state: JobState::Running,
        }));

        let ctx = JobContext {
            job: job.clone(),
            engine: self.engine.clone(),
            events: self.events.clone(),
            status: status.clone(),
            slot: InFlight {
                slot: self.in_flight.clone(),
                id,
            },
        };

        // On spawn failure the context, and with it the slot guard, is dropped.
        let worker = thread::Builder::new()
            .name(format!("separation-{id}"))
            .spawn(move || run_job(ctx))
            .map_err(|e| anyhow::anyhow!("Failed to spawn separation thread: {e}"))?;

        log::info!(
            "[job {id}] Started: {:?} -> {:?} ({})",
            job.input,
            job.output_dir,
            job.stem_count
        );

        Ok(JobHandle {
            job,
            status,
            worker: Some(worker),
        })
    }
}

/// Clears the orchestrator's in-flight slot, at the latest when dropped.
struct InFlight {
    slot: Arc<Mutex<Option<JobId>>>,
    id: JobId,
}

impl InFlight {
    fn release(&self) {
        let mut slot = self.slot.lock();
        if *slot == Some(self.id) {
            *slot = None;
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.release();
    }
}

struct JobContext {
    job: SeparationJob,
    engine: Arc<dyn SeparationEngine>,
    events: Sender<Event>,
    status: Arc<Mutex<JobStatus>>,
    slot: InFlight,
}

fn run_job(ctx: JobContext) {
    let JobContext {
        job,
        engine,
        events,
        status,
        slot,
    } = ctx;
    let started = Instant::now();

    emit(
        &events,
        Event::SeparationStarted {
            job: job.id,
            percent: 0,
        },
    );

    // A panic anywhere in the job (engine, decoder, resampler) still ends in a terminal event.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        separate_and_load(&job, engine.as_ref(), &events, &status)
    }))
    .unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        Err(StemError::EngineFailure(format!("separation panicked: {msg}")))
    });

    // Free the slot first so a listener reacting to the terminal event can start again.
    slot.release();

    match outcome {
        Ok((stems, metadata)) => {
            {
                let mut st = status.lock();
                st.progress = 100;
                st.state = JobState::Succeeded;
            }
            log::info!(
                "[job {}] Separated {} stems in {:?} ({})",
                job.id,
                stems.len(),
                started.elapsed(),
                metadata
            );
            emit(
                &events,
                Event::SeparationSucceeded {
                    job: job.id,
                    stems: Arc::new(stems),
                    metadata,
                },
            );
        }
        Err(e) => {
            let reason = e.to_string();
            {
                let mut st = status.lock();
                st.state = JobState::Failed(reason.clone());
            }
            log::warn!("[job {}] Failed after {:?}: {}", job.id, started.elapsed(), reason);
            emit(&events, Event::SeparationFailed { job: job.id, reason });
        }
    }
}

fn separate_and_load(
    job: &SeparationJob,
    engine: &dyn SeparationEngine,
    events: &Sender<Event>,
    status: &Mutex<JobStatus>,
) -> Result<(StemSet, AudioMetadata)> {
    let last = AtomicU8::new(0);
    let report = |percent: u8| {
        // 0 was announced by Started and 100 belongs to the terminal event.
        if percent == 0 || percent >= 100 {
            return;
        }
        if last.fetch_max(percent, Ordering::Relaxed) < percent {
            status.lock().progress = percent;
            emit(
                events,
                Event::SeparationProgress {
                    job: job.id,
                    percent,
                },
            );
        }
    };

    let files = engine
        .separate(&job.input, &job.output_dir, job.stem_count, &report)
        .map_err(|e| StemError::EngineFailure(format!("{e:#}")))?;

    if files.len() != job.stem_count.count() {
        return Err(StemError::IoFailure(format!(
            "engine produced {} stem files, expected {}",
            files.len(),
            job.stem_count.count()
        )));
    }

    let stems = load_stem_files(&files)?;
    let metadata = read_metadata(&job.input).map_err(|e| {
        StemError::IoFailure(format!("failed to read metadata of {:?}: {e}", job.input))
    })?;

    Ok((stems, metadata))
}

/// Decodes stem files in parallel and conforms them to the first stem's format.
pub fn load_stem_files(files: &[StemFile]) -> Result<StemSet> {
    let decoded = files
        .par_iter()
        .map(|f| {
            read_audio(&f.path)
                .map(|buffer| Stem::new(f.name.clone(), buffer))
                .map_err(|e| {
                    StemError::IoFailure(format!(
                        "failed to load stem `{}` from {:?}: {e}",
                        f.name, f.path
                    ))
                })
        })
        .collect::<Result<Vec<Stem>>>()?;

    let target = decoded
        .first()
        .map(|s| s.buffer.format())
        .ok_or_else(|| StemError::IoFailure("no stem files".into()))?;

    let stems = decoded
        .into_iter()
        .map(|stem| {
            if stem.buffer.format() == target {
                return Ok(stem);
            }
            log::warn!(
                "Stem `{}` is {}, converting to {}",
                stem.name,
                stem.buffer.format(),
                target
            );
            let buffer = conform(&stem.buffer, target)?;
            Ok(Stem::new(stem.name, buffer))
        })
        .collect::<Result<Vec<Stem>>>()?;

    StemSet::new(stems)
}
