//! End-to-end: queue a song, play it, observe the stop at the end.

mod helpers;

use chorus_common::events::IdleMask;
use chorus_common::{SignedSongTime, SongTime};
use chorus_engine::queue::SingleMode;
use chorus_engine::PlayerState;
use helpers::*;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_queue_play_stop() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);
    let mut rx = engine.bus.subscribe();

    let duration = engine.loader.default_duration;
    engine.append("test://a");
    engine.partition.play_any().unwrap();

    // every sample of the song reaches the output
    let expected = samples_for(duration);
    engine.pump_until("all samples played", TIMEOUT, || {
        engine.logs[0].sample_count() >= expected
    });
    assert_eq!(engine.logs[0].sample_count(), expected);

    // after the song ends, the player returns to STOP
    engine.pump_until("player stopped", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Stop
    });

    let mask = drain_idle(&mut rx);
    assert!(mask.contains(IdleMask::PLAYLIST), "append raises playlist");
    assert!(mask.contains(IdleMask::PLAYER), "playback raises player");

    assert!(engine.partition.get_error().is_none());
    engine.shutdown();
}

#[test]
fn test_elapsed_time_advances() {
    let mut spec = OutputSpec::named("main");
    spec.realtime = true;
    let engine = TestEngine::build(vec![spec]);

    let loader = TestSongLoader::new(SongTime::from_secs(30));
    engine.partition.append_uri(&loader, "test://long").unwrap();
    engine.partition.play_any().unwrap();

    engine.pump_until("playing", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Play
    });

    let first = engine.partition.status().player.elapsed_time;
    engine.pump_until("elapsed advances", TIMEOUT, || {
        engine.partition.status().player.elapsed_time > first
    });

    engine.shutdown();
}

#[test]
fn test_clear_then_append() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);

    engine.append("test://a");
    engine.append("test://b");
    engine.partition.clear_queue();
    engine.append("test://c");

    let status = engine.partition.status();
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.current_position, None);
    assert_eq!(status.player.state, PlayerState::Stop);

    engine.shutdown();
}

#[test]
fn test_set_repeat_is_idempotent() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);
    let mut rx = engine.bus.subscribe();

    engine.partition.set_repeat(true);
    engine.partition.dispatch_pending();
    assert!(drain_idle(&mut rx).contains(IdleMask::OPTIONS));

    // same value again: no observable effect
    engine.partition.set_repeat(true);
    engine.partition.dispatch_pending();
    assert!(!drain_idle(&mut rx).contains(IdleMask::OPTIONS));
    assert!(engine.partition.status().repeat);

    engine.shutdown();
}

#[test]
fn test_pause_twice_stays_paused() {
    let mut spec = OutputSpec::named("main");
    spec.realtime = true;
    let engine = TestEngine::build(vec![spec]);

    let loader = TestSongLoader::new(SongTime::from_secs(30));
    engine.partition.append_uri(&loader, "test://long").unwrap();
    engine.partition.play_any().unwrap();

    engine.pump_until("playing", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Play
    });

    engine.partition.set_pause(true);
    engine.pump_until("paused", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Pause
    });
    let pauses = engine.logs[0]
        .begin_pauses
        .load(std::sync::atomic::Ordering::SeqCst);

    // second pause does not re-enter the pause dispatch
    engine.partition.set_pause(true);
    std::thread::sleep(Duration::from_millis(50));
    engine.partition.dispatch_pending();
    assert_eq!(engine.partition.player_state(), PlayerState::Pause);
    assert_eq!(
        engine.logs[0]
            .begin_pauses
            .load(std::sync::atomic::Ordering::SeqCst),
        pauses
    );

    engine.partition.set_pause(false);
    engine.pump_until("resumed", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Play
    });

    engine.shutdown();
}

#[test]
fn test_play_next_and_previous() {
    let mut spec = OutputSpec::named("main");
    spec.realtime = true;
    let engine = TestEngine::build(vec![spec]);

    let loader = TestSongLoader::new(SongTime::from_secs(30));
    for uri in ["test://a", "test://b", "test://c"] {
        engine.partition.append_uri(&loader, uri).unwrap();
    }

    engine.partition.play_position(0).unwrap();
    engine.pump_until("song 0", TIMEOUT, || {
        engine.partition.status().current_position == Some(0)
    });

    engine.partition.play_next().unwrap();
    engine.pump_until("song 1", TIMEOUT, || {
        engine.partition.status().current_position == Some(1)
    });

    engine.partition.play_previous().unwrap();
    engine.pump_until("song 0 again", TIMEOUT, || {
        engine.partition.status().current_position == Some(0)
    });

    // next/previous require active playback
    engine.partition.stop();
    assert!(engine.partition.play_next().is_err());

    engine.shutdown();
}

#[test]
fn test_single_one_shot_downgrades_after_border() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);

    engine.append("test://a");
    engine.append("test://b");
    engine.partition.set_single(SingleMode::OneShot);
    engine.partition.play_position(0).unwrap();

    // single mode means no queued song: the player stops after song a
    engine.pump_until("stopped after one song", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Stop
    });
    assert_eq!(
        engine.logs[0].sample_count(),
        samples_for(engine.loader.default_duration)
    );

    // the one-shot is spent
    engine.pump_until("single back to off", TIMEOUT, || {
        engine.partition.status().single == SingleMode::Off
    });

    engine.shutdown();
}

#[test]
fn test_relative_seek_argument_validation() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);

    // seeking with nothing playing is an error
    assert!(engine
        .partition
        .seek_current(SignedSongTime::from_secs(1), true)
        .is_err());

    engine.shutdown();
}
