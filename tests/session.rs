mod common;

use std::{sync::Arc, thread, time::Duration};

use approx::assert_abs_diff_eq;
use common::{stem, RECV_TIMEOUT};
use stem_mixer_core::{Event, MixConfig, MixSession, StemError, StemSet};

fn on_demand() -> MixConfig {
    MixConfig {
        background: false,
        ..MixConfig::default()
    }
}

fn two_stems() -> Arc<StemSet> {
    Arc::new(
        StemSet::new(vec![stem("vocals", vec![0.1; 1000]), stem("accompaniment", vec![0.2; 1000])])
            .unwrap(),
    )
}

#[test]
fn set_gain_rejects_out_of_range_index() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);

    assert!(session.set_gain(1, 0.5).is_ok());
    match session.set_gain(2, 0.5) {
        Err(StemError::IndexOutOfRange { index, len }) => {
            assert_eq!(index, 2);
            assert_eq!(len, 2);
        }
        other => panic!("expected IndexOutOfRange, got {other:?}"),
    }
}

#[test]
fn set_gain_rejects_non_finite_values() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);
    assert!(matches!(
        session.set_gain(0, f32::NAN),
        Err(StemError::InvalidInput(_))
    ));
    assert_eq!(session.gains().as_slice(), &[1.0, 1.0]);
}

#[test]
fn current_mix_without_stems_fails() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);
    assert!(matches!(session.current_mix(), Err(StemError::NoStemsLoaded)));
}

#[test]
fn gains_set_before_stems_apply_once_loaded() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);

    session.set_gain(0, 0.0).unwrap();
    session.set_gain(1, 2.0).unwrap();
    assert_eq!(session.mixes_computed(), 0);

    session.load_stems(two_stems());
    let mix = session.current_mix().unwrap();
    assert_eq!(mix.gains.as_slice(), &[0.0, 2.0]);
    assert_abs_diff_eq!(mix.buffer.samples()[0], 0.4, epsilon = 1e-6);
}

#[test]
fn burst_of_gain_changes_mixes_once_from_final_values() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);
    session.load_stems(two_stems());

    for step in 0..50 {
        session.set_gain(step % 2, step as f32 / 50.0).unwrap();
    }
    let mix = session.current_mix().unwrap();

    assert_eq!(session.mixes_computed(), 1);
    assert_eq!(mix.gains.as_slice(), &[48.0 / 50.0, 49.0 / 50.0]);
    let expected = 0.1 * 48.0 / 50.0 + 0.2 * 49.0 / 50.0;
    assert_abs_diff_eq!(mix.buffer.samples()[0], expected, epsilon = 1e-6);
}

#[test]
fn current_mix_is_reused_until_gains_change() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);
    session.load_stems(two_stems());

    let first = session.current_mix().unwrap();
    let again = session.current_mix().unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(session.mixes_computed(), 1);

    session.set_gain(0, 0.5).unwrap();
    let changed = session.current_mix().unwrap();
    assert!(changed.generation > first.generation);
    assert_eq!(session.mixes_computed(), 2);
    assert!(Arc::ptr_eq(&changed, &session.latest_mix().unwrap()));
}

#[test]
fn background_worker_coalesces_bursts() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let config = MixConfig {
        background: true,
        debounce_ms: 100,
        ..MixConfig::default()
    };
    let session = MixSession::new(&config, 2, tx);
    session.load_stems(two_stems());

    for step in 0..50 {
        session.set_gain(0, step as f32 / 100.0).unwrap();
    }

    let mut last = None;
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(500)) {
        if let Event::MixReady { mix } = event {
            last = Some(mix);
        }
    }
    let last = last.expect("worker never published a mix");

    assert!(session.mixes_computed() < 50);
    assert_eq!(last.gains.as_slice(), &[0.49, 1.0]);
    assert!(Arc::ptr_eq(&last, &session.current_mix().unwrap()));
}

#[test]
fn background_worker_mixes_after_stems_arrive() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let config = MixConfig {
        background: true,
        debounce_ms: 0,
        ..MixConfig::default()
    };
    let session = MixSession::new(&config, 2, tx);
    session.load_stems(two_stems());

    match rx.recv_timeout(RECV_TIMEOUT).unwrap() {
        Event::MixReady { mix } => {
            assert_eq!(mix.buffer.len(), 1000);
            assert_abs_diff_eq!(mix.buffer.samples()[0], 0.3, epsilon = 1e-6);
        }
        other => panic!("expected MixReady, got {other:?}"),
    }
}

#[test]
fn dropping_session_stops_worker() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let config = MixConfig {
        background: true,
        debounce_ms: 10_000,
        ..MixConfig::default()
    };
    let session = MixSession::new(&config, 2, tx);
    session.load_stems(two_stems());
    thread::sleep(Duration::from_millis(20));

    // The worker is inside its debounce window; drop must not wait it out.
    let started = std::time::Instant::now();
    drop(session);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(rx.try_recv().is_err());
}

#[test]
fn changing_layout_resets_gains_and_drops_stems() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 2, tx);
    session.load_stems(two_stems());
    session.set_gain(0, 0.3).unwrap();

    session.set_layout(2);
    assert_eq!(session.gains().as_slice(), &[0.3, 1.0]);
    assert!(session.stems().is_some());

    session.set_layout(4);
    assert_eq!(session.gains().as_slice(), &[1.0; 4]);
    assert!(session.stems().is_none());
    assert!(matches!(session.current_mix(), Err(StemError::NoStemsLoaded)));
}

#[test]
fn loading_stems_of_another_count_resets_gains() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let session = MixSession::new(&on_demand(), 4, tx);
    session.set_gain(3, 0.0).unwrap();

    session.load_stems(two_stems());
    assert_eq!(session.gains().as_slice(), &[1.0, 1.0]);
    assert_eq!(session.current_mix().unwrap().buffer.len(), 1000);
}
