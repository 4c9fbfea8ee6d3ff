//! Message-passing front door for a presentation layer.
//!
//! A [`Studio`] owns the orchestrator and the mix session. It consumes
//! [`Command`]s, routes finished separations into the session, hands mixes to
//! an optional [`PlaybackSink`] and forwards every [`Event`] outward.

use std::{path::Path, sync::Arc};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    config::StudioConfig,
    core::{
        engine::SeparationEngine,
        orchestrator::{JobHandle, SeparationOrchestrator},
        session::{MixResult, MixSession},
    },
    error::Result,
    io::{
        events::{emit, Command, Event},
        playback::PlaybackSink,
    },
    types::JobId,
};

pub struct Studio {
    config: StudioConfig,
    orchestrator: SeparationOrchestrator,
    session: MixSession,
    internal: Receiver<Event>,
    events: Sender<Event>,
    job: Option<JobHandle>,
    sink: Option<Box<dyn PlaybackSink>>,
}

impl Studio {
    pub fn new(
        config: StudioConfig,
        engine: Arc<dyn SeparationEngine>,
        events: Sender<Event>,
    ) -> Self {
        let (internal_tx, internal) = crossbeam_channel::unbounded();
        let orchestrator = SeparationOrchestrator::new(engine, internal_tx.clone());
        let session = MixSession::new(&config.mix, config.stem_count.count(), internal_tx);

        Self {
            config,
            orchestrator,
            session,
            internal,
            events,
            job: None,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: impl PlaybackSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn session(&self) -> &MixSession {
        &self.session
    }

    pub fn orchestrator(&self) -> &SeparationOrchestrator {
        &self.orchestrator
    }

    /// Id of the most recently requested separation.
    pub fn current_job(&self) -> Option<JobId> {
        self.job.as_ref().map(JobHandle::id)
    }

    /// Applies one command. Failures are also reported as
    /// [`Event::CommandRejected`].
    pub fn handle(&mut self, command: Command) -> Result<()> {
        log::debug!("Command: {:?}", command);

        let outcome = match command {
            Command::RequestSeparation { path, stem_count } => {
                self.request_separation(&path, stem_count)
            }
            Command::SetGain { index, gain } => self.session.set_gain(index, gain),
            Command::RequestCurrentMix => match self.session.current_mix() {
                Ok(mix) => {
                    self.deliver_mix(mix);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Shutdown => Ok(()),
        };

        if let Err(e) = &outcome {
            log::warn!("Command rejected: {e}");
            emit(
                &self.events,
                Event::CommandRejected {
                    reason: e.to_string(),
                },
            );
        }
        outcome
    }

    fn request_separation(&mut self, path: &Path, stem_count: u8) -> Result<()> {
        let handle = self
            .orchestrator
            .start(path, self.config.output_dir.as_deref(), stem_count)?;
        self.session.set_layout(handle.job().stem_count.count());

        // The orchestrator only accepts a job once the previous one has finished.
        if let Some(previous) = self.job.replace(handle) {
            previous.wait();
        }
        Ok(())
    }

    /// Routes an event from the orchestrator or session, then forwards it.
    ///
    /// Stems of a job superseded by a later request are not loaded; its
    /// terminal event is still forwarded.
    pub fn dispatch(&mut self, event: Event) {
        match &event {
            Event::SeparationSucceeded { job, stems, .. } => {
                if self.current_job() == Some(*job) {
                    self.session.load_stems(stems.clone());
                } else {
                    log::info!("Ignoring stems of superseded job {job}");
                }
            }
            Event::MixReady { mix } => self.play(mix),
            _ => {}
        }
        emit(&self.events, event);
    }

    /// Dispatches queued internal events without blocking. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut n = 0;
        while let Ok(event) = self.internal.try_recv() {
            self.dispatch(event);
            n += 1;
        }
        n
    }

    /// Serves `commands` until [`Command::Shutdown`] or until the sender hangs up.
    pub fn run(mut self, commands: Receiver<Command>) {
        log::info!("Studio started");
        let internal = self.internal.clone();

        loop {
            crossbeam_channel::select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => {
                        let _ = self.handle(cmd);
                    }
                },
                recv(internal) -> event => {
                    if let Ok(event) = event {
                        self.dispatch(event);
                    }
                }
            }
        }

        if let Some(job) = self.job.take() {
            if !job.is_finished() {
                log::info!("Leaving separation job {} to finish on its own", job.id());
            }
        }
        log::info!("Studio stopped");
    }

    fn deliver_mix(&mut self, mix: Arc<MixResult>) {
        self.play(&mix);
        emit(&self.events, Event::MixReady { mix });
    }

    fn play(&mut self, mix: &MixResult) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.play(&mix.buffer) {
                log::error!("Playback sink rejected mix {}: {e}", mix.generation);
            }
        }
    }
}
