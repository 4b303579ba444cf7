//! Output controller behaviour observable through the public surface.

mod helpers;

use chorus_common::SongTime;
use chorus_engine::PlayerState;
use helpers::*;
use std::sync::atomic::Ordering;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_short_writes_deliver_everything_once() {
    let mut spec = OutputSpec::named("main");
    // the device accepts at most 100 samples per call
    spec.short_write = Some(100);
    let engine = TestEngine::build(vec![spec]);

    let duration = SongTime::from_millis(120);
    let loader = TestSongLoader::new(duration);
    engine.partition.append_uri(&loader, "test://a").unwrap();
    engine.partition.play_any().unwrap();

    let expected = samples_for(duration);
    engine.pump_until("all samples arrived", TIMEOUT, || {
        engine.logs[0].sample_count() >= expected
    });
    engine.pump_until("stopped", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Stop
    });

    // short writes never drop or duplicate samples
    let samples = engine.logs[0].samples();
    assert_eq!(samples.len(), expected);
    let amp = amplitude_for("test://a");
    assert!(samples.iter().all(|&s| (s - amp).abs() < 1e-6));

    engine.shutdown();
}

#[test]
fn test_enable_then_disable_closes_the_device() {
    let mut a = OutputSpec::named("a");
    a.realtime = true;
    let mut b = OutputSpec::named("b");
    b.realtime = true;
    let engine = TestEngine::build(vec![a, b]);

    let loader = TestSongLoader::new(SongTime::from_secs(30));
    engine.partition.append_uri(&loader, "test://long").unwrap();
    engine.partition.play_any().unwrap();

    engine.pump_until("output b playing", TIMEOUT, || {
        engine.logs[1].sample_count() > 0
    });

    // disable output b while it is open
    assert!(engine.partition.enable_output(1, false).unwrap());
    engine.pump_until("output b closed", TIMEOUT, || {
        let status = &engine.partition.output_statuses()[1];
        !status.enabled && !status.open
    });
    assert!(engine.logs[1].closes.load(Ordering::SeqCst) >= 1);

    // disabling again reports "unchanged"
    assert!(!engine.partition.enable_output(1, false).unwrap());

    // output a is unaffected
    let before = engine.logs[0].sample_count();
    engine.pump_until("output a still playing", TIMEOUT, || {
        engine.logs[0].sample_count() > before
    });

    // re-enable: b rejoins mid-song
    assert!(engine.partition.enable_output(1, true).unwrap());
    engine.pump_until("output b reopened", TIMEOUT, || {
        engine.logs[1].opens.load(Ordering::SeqCst) >= 2
    });

    engine.shutdown();
}

#[test]
fn test_indefinite_delay_interrupted_by_command() {
    use chorus_common::AudioFormat;
    use chorus_engine::error::Result as EngineResult;
    use chorus_engine::output::{OutputPlugin, PlayDelay};
    use chorus_engine::{OutputConfig, Partition, PartitionConfig};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Accepts one play call, then reports an indefinite delay: the
    /// worker parks on its condvar until a command wakes it.
    struct StuckOutput {
        played: Arc<AtomicUsize>,
        paused: Arc<AtomicUsize>,
    }

    impl OutputPlugin for StuckOutput {
        fn plugin_name(&self) -> &'static str {
            "stuck"
        }

        fn supports_pause(&self) -> bool {
            true
        }

        fn open(&mut self, format: AudioFormat) -> EngineResult<AudioFormat> {
            Ok(format)
        }

        fn close(&mut self, _drain: bool) {}

        fn delay(&self) -> PlayDelay {
            if self.played.load(Ordering::SeqCst) > 0 {
                PlayDelay::Indefinite
            } else {
                PlayDelay::Ready
            }
        }

        fn play(&mut self, samples: &[f32]) -> EngineResult<usize> {
            self.played.fetch_add(1, Ordering::SeqCst);
            Ok(samples.len())
        }

        fn begin_pause(&mut self) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        fn iterate_pause(&mut self) -> EngineResult<()> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        }
    }

    let played = Arc::new(AtomicUsize::new(0));
    let paused = Arc::new(AtomicUsize::new(0));
    let device = StuckOutput {
        played: Arc::clone(&played),
        paused: Arc::clone(&paused),
    };

    let bus = chorus_common::EventBus::new(64);
    let partition = Partition::new(
        "default",
        PartitionConfig::default(),
        vec![(
            OutputConfig::new("stuck"),
            Some(Box::new(device) as Box<dyn OutputPlugin>),
            None,
        )],
        Arc::new(ToneDecoder),
        bus,
    );

    let loader = TestSongLoader::new(SongTime::from_secs(30));
    partition.append_uri(&loader, "test://long").unwrap();
    partition.play_any().unwrap();

    // wait until the worker is parked in its indefinite delay
    let deadline = std::time::Instant::now() + TIMEOUT;
    while played.load(Ordering::SeqCst) == 0 {
        partition.dispatch_pending();
        assert!(std::time::Instant::now() < deadline, "never played");
        std::thread::sleep(Duration::from_millis(2));
    }

    // the pause command must end the indefinite wait
    partition.set_pause(true);
    let deadline = std::time::Instant::now() + TIMEOUT;
    while paused.load(Ordering::SeqCst) == 0 {
        partition.dispatch_pending();
        assert!(
            std::time::Instant::now() < deadline,
            "indefinite delay was not interrupted by the command"
        );
        std::thread::sleep(Duration::from_millis(2));
    }

    partition.begin_shutdown();
}

#[test]
fn test_toggle_output() {
    let engine = TestEngine::build(vec![OutputSpec::named("main")]);

    assert!(!engine.partition.toggle_output(0).unwrap());
    assert!(engine.partition.toggle_output(0).unwrap());
    assert!(engine.partition.toggle_output(99).is_err());

    engine.shutdown();
}

#[test]
fn test_replace_dummy_brings_output_online() {
    use chorus_engine::output::OutputPlugin;
    use chorus_engine::{OutputConfig, Partition, PartitionConfig};
    use std::sync::Arc;

    let bus = chorus_common::EventBus::new(64);

    // one real output, one dummy (its device plugin failed to load)
    let real_spec = OutputSpec::named("real");
    let (real_device, real_log) = RecordingOutput::new(&real_spec);

    let partition = Partition::new(
        "default",
        PartitionConfig::default(),
        vec![
            (
                OutputConfig::new("real"),
                Some(Box::new(real_device) as Box<dyn OutputPlugin>),
                None,
            ),
            (OutputConfig::new("late"), None, None),
        ],
        Arc::new(ToneDecoder),
        bus,
    );

    let dummy = Arc::clone(partition.outputs.get(1).unwrap());
    assert!(dummy.is_dummy());

    // playback works with only the real output
    let loader = TestSongLoader::new(SongTime::from_millis(100));
    partition.append_uri(&loader, "test://a").unwrap();
    partition.play_any().unwrap();

    let deadline = std::time::Instant::now() + TIMEOUT;
    while partition.player_state() != PlayerState::Stop {
        partition.dispatch_pending();
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(real_log.sample_count() > 0);

    // bind the late device; it joins the next playback
    let late_spec = OutputSpec::named("late");
    let (late_device, late_log) = RecordingOutput::new(&late_spec);
    dummy.replace_dummy(Box::new(late_device), None, true);
    assert!(!dummy.is_dummy());

    partition.play_any().unwrap();
    let deadline = std::time::Instant::now() + TIMEOUT;
    while late_log.sample_count() == 0 {
        partition.dispatch_pending();
        assert!(
            std::time::Instant::now() < deadline,
            "late output never played"
        );
        std::thread::sleep(Duration::from_millis(2));
    }

    partition.begin_shutdown();
}

#[test]
fn test_volume_via_memento() {
    let mut spec = OutputSpec::named("main");
    spec.with_mixer = true;
    let engine = TestEngine::build(vec![spec]);

    engine.partition.set_volume(40).unwrap();
    assert_eq!(engine.partition.get_volume(), Some(40));

    assert!(engine.partition.set_volume(101).is_err());
    assert_eq!(engine.partition.get_volume(), Some(40));

    engine.shutdown();
}

#[test]
fn test_replay_gain_auto_resolution_follows_random() {
    use chorus_common::events::EngineEvent;
    use chorus_common::ReplayGainMode;

    let engine = TestEngine::build(vec![OutputSpec::named("main")]);
    let mut rx = engine.bus.subscribe();

    engine.partition.set_replay_gain_mode(ReplayGainMode::Auto);

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::ReplayGainModeChanged { mode, .. } = event {
            last = Some(mode);
        }
    }
    // sequential order resolves AUTO to album gain
    assert_eq!(last, Some(ReplayGainMode::Album));

    // random order resolves AUTO to track gain
    engine.partition.set_random(true);
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::ReplayGainModeChanged { mode, .. } = event {
            last = Some(mode);
        }
    }
    assert_eq!(last, Some(ReplayGainMode::Track));

    engine.shutdown();
}

#[test]
fn test_replay_gain_scales_output() {
    use chorus_common::{ReplayGainInfo, ReplayGainMode, ReplayGainTuple, Tag};
    use chorus_engine::queue::DetachedSong;

    let engine = TestEngine::build(vec![OutputSpec::named("main")]);
    engine.partition.set_replay_gain_mode(ReplayGainMode::Track);

    let duration = SongTime::from_millis(100);
    let tag = Tag::builder()
        .duration(duration)
        .replay_gain(ReplayGainInfo {
            track: Some(ReplayGainTuple::new(-6.0, 0.0)),
            album: None,
        })
        .build();

    // feed the song directly; the loader double has no replay-gain tags
    let song = DetachedSong::new("test://gained").with_tag(tag);
    {
        // append through the partition surface
        struct OneSong(DetachedSong);
        impl chorus_engine::queue::SongLoader for OneSong {
            fn load(&self, _uri: &str) -> chorus_engine::Result<DetachedSong> {
                Ok(self.0.clone())
            }
        }
        engine
            .partition
            .append_uri(&OneSong(song), "test://gained")
            .unwrap();
    }

    engine.partition.play_any().unwrap();
    engine.pump_until("stopped", TIMEOUT, || {
        engine.partition.player_state() == PlayerState::Stop
    });

    // -6 dB is a scale of ~0.5
    let amp = amplitude_for("test://gained");
    let expected = amp * 10f32.powf(-6.0 / 20.0);
    let samples = engine.logs[0].samples();
    assert!(!samples.is_empty());
    assert!(
        samples.iter().all(|&s| (s - expected).abs() < 1e-3),
        "replay gain not applied"
    );

    engine.shutdown();
}
