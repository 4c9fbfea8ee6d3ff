//! Owns the gain vector and the loaded stems, and keeps a mix of them current.
//!
//! Every gain edit and stem load bumps a generation counter under one lock.
//! A mix is always computed from a snapshot taken under that lock, so it never
//! sees a half-edited gain vector, and a [`MixResult`] is current exactly when
//! its generation matches the session's.
//!
//! With [`MixConfig::background`] set, a worker thread recomputes after edits.
//! It waits [`MixConfig::debounce_ms`] after the first edit before taking its
//! snapshot, so a burst of edits (a dragged slider) collapses into one mix.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::{
    config::MixConfig,
    core::mixer::StemMixer,
    error::{Result, StemError},
    io::events::{emit, Event},
    types::{AudioBuffer, GainVector, StemSet},
};

/// A finished mix and the inputs it was computed from.
#[derive(Clone, Debug)]
pub struct MixResult {
    pub generation: u64,
    pub gains: GainVector,
    pub buffer: AudioBuffer,
}

struct SessionState {
    stems: Option<Arc<StemSet>>,
    gains: GainVector,
    generation: u64,
    latest: Option<Arc<MixResult>>,
    dirty: bool,
    shutdown: bool,
}

impl SessionState {
    fn is_current(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|m| m.generation == self.generation)
    }

    fn touch(&mut self) {
        self.generation += 1;
        if self.stems.is_some() {
            self.dirty = true;
        }
    }

    /// Keeps `result` unless something newer has already been published.
    fn publish(&mut self, result: MixResult) -> Arc<MixResult> {
        match &self.latest {
            Some(existing) if existing.generation >= result.generation => existing.clone(),
            _ => {
                let result = Arc::new(result);
                self.latest = Some(result.clone());
                result
            }
        }
    }
}

struct Shared {
    state: Mutex<SessionState>,
    wake: Condvar,
    mixer: StemMixer,
    debounce: Duration,
    mixes: AtomicU64,
    events: Sender<Event>,
}

struct Snapshot {
    generation: u64,
    stems: Arc<StemSet>,
    gains: GainVector,
}

impl Shared {
    fn compute(&self, snap: Snapshot) -> Result<MixResult> {
        let buffer = self.mixer.mix(snap.stems.as_slice(), snap.gains.as_slice())?;
        self.mixes.fetch_add(1, Ordering::Relaxed);
        log::debug!("Mixed generation {}", snap.generation);

        Ok(MixResult {
            generation: snap.generation,
            gains: snap.gains,
            buffer,
        })
    }
}

pub struct MixSession {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl MixSession {
    /// Creates a session with `stem_count` unity gains and no stems.
    /// Background mixes are announced on `events` as [`Event::MixReady`].
    pub fn new(config: &MixConfig, stem_count: usize, events: Sender<Event>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState {
                stems: None,
                gains: GainVector::unity(stem_count),
                generation: 0,
                latest: None,
                dirty: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            mixer: StemMixer::new(config.clip),
            debounce: config.debounce(),
            mixes: AtomicU64::new(0),
            events,
        });

        let worker = if config.background {
            let shared = shared.clone();
            match thread::Builder::new()
                .name("mix-worker".to_string())
                .spawn(move || mix_worker(shared))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("Failed to spawn mix worker, mixing on demand only: {e}");
                    None
                }
            }
        } else {
            None
        };

        Self { shared, worker }
    }

    /// Resizes the gain vector for a separation with `stem_count` stems.
    ///
    /// A different count resets gains to unity and drops loaded stems, which
    /// no longer line up with the controls.
    pub fn set_layout(&self, stem_count: usize) {
        let mut state = self.shared.state.lock();
        if state.gains.len() == stem_count {
            return;
        }
        state.gains = GainVector::unity(stem_count);
        state.stems = None;
        state.latest = None;
        state.generation += 1;
        state.dirty = false;
    }

    /// Replaces the stem set wholesale and schedules a mix.
    pub fn load_stems(&self, stems: Arc<StemSet>) {
        let mut state = self.shared.state.lock();
        if state.gains.len() != stems.len() {
            state.gains = GainVector::unity(stems.len());
        }
        log::info!("Loaded {} stems: {:?}", stems.len(), stems.names());
        state.stems = Some(stems);
        state.latest = None;
        state.touch();
        self.shared.wake.notify_all();
    }

    /// Records `gain` for stem `index`.
    ///
    /// The value is kept even without loaded stems and applies once they arrive.
    pub fn set_gain(&self, index: usize, gain: f32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.gains.set(index, gain)?;
        state.touch();
        if state.dirty {
            self.shared.wake.notify_all();
        }
        Ok(())
    }

    pub fn gains(&self) -> GainVector {
        self.shared.state.lock().gains.clone()
    }

    pub fn stems(&self) -> Option<Arc<StemSet>> {
        self.shared.state.lock().stems.clone()
    }

    /// Latest published mix, current or not. Never computes.
    pub fn latest_mix(&self) -> Option<Arc<MixResult>> {
        self.shared.state.lock().latest.clone()
    }

    /// Number of mixes computed since the session was created.
    pub fn mixes_computed(&self) -> u64 {
        self.shared.mixes.load(Ordering::Relaxed)
    }

    /// Mix of the loaded stems with the current gains.
    ///
    /// Returns the published mix when it is current; otherwise mixes the
    /// current snapshot on the calling thread and publishes it.
    pub fn current_mix(&self) -> Result<Arc<MixResult>> {
        let snap = {
            let mut state = self.shared.state.lock();
            let stems = state.stems.clone().ok_or(StemError::NoStemsLoaded)?;
            if state.is_current() {
                if let Some(latest) = &state.latest {
                    return Ok(latest.clone());
                }
            }
            // The worker would only redo this snapshot.
            state.dirty = false;
            Snapshot {
                generation: state.generation,
                stems,
                gains: state.gains.clone(),
            }
        };

        let result = self.shared.compute(snap)?;
        Ok(self.shared.state.lock().publish(result))
    }
}

impl Drop for MixSession {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Mix worker panicked");
            }
        }
    }
}

fn mix_worker(shared: Arc<Shared>) {
    log::debug!("Mix worker started");

    loop {
        let snap = {
            let mut state = shared.state.lock();
            while !state.dirty && !state.shutdown {
                shared.wake.wait(&mut state);
            }

            // Let a burst of edits settle before snapshotting.
            let deadline = Instant::now() + shared.debounce;
            while !state.shutdown && Instant::now() < deadline {
                if shared.wake.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if state.shutdown {
                break;
            }

            state.dirty = false;
            let Some(stems) = state.stems.clone() else {
                continue;
            };
            if state.is_current() {
                continue;
            }
            Snapshot {
                generation: state.generation,
                stems,
                gains: state.gains.clone(),
            }
        };

        let generation = snap.generation;
        match shared.compute(snap) {
            Ok(result) => {
                let published = shared.state.lock().publish(result);
                // A synchronous current_mix() may have published something newer.
                if published.generation == generation {
                    emit(&shared.events, Event::MixReady { mix: published });
                }
            }
            Err(e) => log::error!("Background mix failed: {e}"),
        }
    }

    log::debug!("Mix worker stopped");
}
