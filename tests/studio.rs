mod common;

use std::{
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use approx::assert_abs_diff_eq;
use common::{recv, write_constant_wav, FakeEngine};
use crossbeam_channel::Receiver;
use stem_mixer_core::{
    read_audio, Command, Event, MixConfig, SeparationEngine, StemCount, StemError, StemFile,
    Studio, StudioConfig, WavFileSink,
};
use tempfile::tempdir;

fn config() -> StudioConfig {
    StudioConfig {
        mix: MixConfig {
            background: false,
            ..MixConfig::default()
        },
        ..StudioConfig::default()
    }
}

fn next_mix(events: &Receiver<Event>) -> Arc<stem_mixer_core::MixResult> {
    loop {
        match recv(events) {
            Event::MixReady { mix } => return mix,
            Event::CommandRejected { reason } => panic!("command rejected: {reason}"),
            _ => {}
        }
    }
}

#[test]
fn separation_then_gain_changes_produce_matching_mix() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("track.wav");
    write_constant_wav(&input, 44_100, 4_410, 0.3);
    let mix_path = tmp.path().join("mix.wav");

    let (event_tx, events) = crossbeam_channel::unbounded();
    let (cmd_tx, commands) = crossbeam_channel::unbounded();
    let studio = Studio::new(config(), Arc::new(FakeEngine::new(500)), event_tx)
        .with_sink(WavFileSink::new(&mix_path));
    let worker = thread::spawn(move || studio.run(commands));

    cmd_tx
        .send(Command::RequestSeparation {
            path: input,
            stem_count: 2,
        })
        .unwrap();
    assert!(matches!(recv(&events), Event::SeparationStarted { .. }));
    match recv(&events) {
        Event::SeparationSucceeded { stems, metadata, .. } => {
            assert_eq!(stems.len(), 2);
            assert_eq!(metadata.sample_rate, 44_100);
        }
        other => panic!("expected SeparationSucceeded, got {other:?}"),
    }

    for step in 0..50 {
        cmd_tx
            .send(Command::SetGain {
                index: 1,
                gain: step as f32 / 49.0,
            })
            .unwrap();
    }
    cmd_tx
        .send(Command::SetGain {
            index: 0,
            gain: -0.5,
        })
        .unwrap();
    cmd_tx.send(Command::RequestCurrentMix).unwrap();

    let mix = next_mix(&events);
    assert_eq!(mix.gains.as_slice(), &[-0.5, 1.0]);
    // vocals hold 0.1, accompaniment 0.2 on the left channel
    assert_abs_diff_eq!(mix.buffer.samples()[0], -0.05 + 0.2, epsilon = 1e-3);
    assert_abs_diff_eq!(mix.buffer.samples()[1], 0.05 - 0.2, epsilon = 1e-3);

    cmd_tx.send(Command::Shutdown).unwrap();
    worker.join().unwrap();

    let written = read_audio(&mix_path).unwrap();
    assert_eq!(written.frames(), 500);
    assert_abs_diff_eq!(written.samples()[0], 0.15, epsilon = 1e-3);
}

#[test]
fn rejected_commands_are_reported() {
    let (event_tx, events) = crossbeam_channel::unbounded();
    let mut studio = Studio::new(config(), Arc::new(FakeEngine::new(10)), event_tx);

    assert!(matches!(
        studio.handle(Command::SetGain { index: 7, gain: 1.0 }),
        Err(StemError::IndexOutOfRange { index: 7, len: 2 })
    ));
    assert!(matches!(recv(&events), Event::CommandRejected { .. }));

    assert!(matches!(
        studio.handle(Command::RequestCurrentMix),
        Err(StemError::NoStemsLoaded)
    ));
    assert!(matches!(recv(&events), Event::CommandRejected { .. }));

    assert!(matches!(
        studio.handle(Command::RequestSeparation {
            path: "missing.wav".into(),
            stem_count: 3,
        }),
        Err(StemError::InvalidInput(_))
    ));
    assert!(matches!(recv(&events), Event::CommandRejected { .. }));
}

#[test]
fn requesting_separation_resizes_gain_controls() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("track.wav");
    write_constant_wav(&input, 44_100, 441, 0.3);

    let (event_tx, events) = crossbeam_channel::unbounded();
    let mut studio = Studio::new(config(), Arc::new(FakeEngine::new(100)), event_tx);

    studio
        .handle(Command::RequestSeparation {
            path: input,
            stem_count: 5,
        })
        .unwrap();
    assert_eq!(studio.session().gains().len(), 5);
    studio.handle(Command::SetGain { index: 4, gain: 0.0 }).unwrap();

    // Drive the internal queue by hand until the stems land.
    let mut succeeded = false;
    while !succeeded {
        let event = studio_event(&mut studio, &events);
        succeeded = matches!(event, Event::SeparationSucceeded { .. });
    }

    let stems = studio.session().stems().unwrap();
    assert_eq!(stems.len(), 5);
    assert_eq!(studio.session().gains().get(4), Some(0.0));
}

fn studio_event(studio: &mut Studio, events: &Receiver<Event>) -> Event {
    let deadline = Instant::now() + common::RECV_TIMEOUT;
    loop {
        studio.pump();
        if let Ok(event) = events.try_recv() {
            return event;
        }
        assert!(Instant::now() < deadline, "no event from studio");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Holds five-stem separations until the test opens the gate.
struct HeldFiveStemEngine {
    gate: Receiver<()>,
    inner: FakeEngine,
}

impl SeparationEngine for HeldFiveStemEngine {
    fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        stems: StemCount,
        progress: &dyn Fn(u8),
    ) -> anyhow::Result<Vec<StemFile>> {
        if stems == StemCount::Five {
            self.gate.recv()?;
        }
        self.inner.separate(input, output_dir, stems, progress)
    }
}

#[test]
fn stems_of_superseded_job_are_not_loaded() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("track.wav");
    write_constant_wav(&input, 44_100, 441, 0.3);

    let (gate_tx, gate) = crossbeam_channel::unbounded();
    let engine = HeldFiveStemEngine {
        gate,
        inner: FakeEngine::new(100),
    };
    let (event_tx, events) = crossbeam_channel::unbounded();
    let mut studio = Studio::new(config(), Arc::new(engine), event_tx);

    studio
        .handle(Command::RequestSeparation {
            path: input.clone(),
            stem_count: 2,
        })
        .unwrap();
    let first = studio.current_job().unwrap();

    // The slot frees before the terminal event is queued; don't pump yet.
    let deadline = Instant::now() + common::RECV_TIMEOUT;
    while studio.orchestrator().is_busy() {
        assert!(Instant::now() < deadline, "first job never finished");
        thread::sleep(Duration::from_millis(2));
    }

    studio
        .handle(Command::RequestSeparation {
            path: input,
            stem_count: 5,
        })
        .unwrap();
    let second = studio.current_job().unwrap();
    assert_ne!(first, second);

    // Drains the first job's events, including its success.
    studio.pump();
    let mut forwarded = Vec::new();
    while let Ok(event) = events.try_recv() {
        forwarded.push(event);
    }
    assert!(forwarded
        .iter()
        .any(|e| matches!(e, Event::SeparationSucceeded { job, .. } if *job == first)));

    assert!(studio.session().stems().is_none());
    assert_eq!(studio.session().gains().len(), 5);
    studio.handle(Command::SetGain { index: 4, gain: 0.25 }).unwrap();

    gate_tx.send(()).unwrap();
    loop {
        if let Event::SeparationSucceeded { job, .. } = studio_event(&mut studio, &events) {
            assert_eq!(job, second);
            break;
        }
    }

    assert_eq!(studio.session().stems().unwrap().len(), 5);
    assert_eq!(studio.session().gains().get(4), Some(0.25));
}
