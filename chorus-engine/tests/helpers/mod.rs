//! Test doubles and harness for the playback engine integration tests.
//!
//! Everything here is deterministic: the tone decoder synthesizes a
//! constant-amplitude signal derived from the song URI (so output capture
//! can tell songs apart), and the recording output captures every sample
//! it is fed.

#![allow(dead_code)]

use chorus_common::events::{EngineEvent, EventBus, IdleMask};
use chorus_common::{AudioFormat, SongTime, Tag};
use chorus_engine::config::{OutputConfig, PartitionConfig, CHUNK_FRAMES};
use chorus_engine::decoder::{DecodedBlock, DecoderInstance, DecoderPlugin};
use chorus_engine::error::{Error, Result};
use chorus_engine::mixer::{Mixer, NullMixer};
use chorus_engine::output::{OutputPlugin, PlayDelay};
use chorus_engine::queue::{DetachedSong, SongLoader};
use chorus_engine::Partition;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub const TEST_FORMAT: AudioFormat = AudioFormat::new(44100, 2);

/// Deterministic per-song amplitude in (0.1, 0.9).
pub fn amplitude_for(uri: &str) -> f32 {
    let hash: u32 = uri
        .bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
    0.1 + (hash % 800) as f32 / 1000.0
}

/// Decoder plugin producing constant-amplitude blocks.
///
/// - duration comes from the song's tag (default 500ms)
/// - `fail://` URIs fail to open
pub struct ToneDecoder;

impl DecoderPlugin for ToneDecoder {
    fn open(&self, song: &DetachedSong, start: SongTime) -> Result<Box<dyn DecoderInstance>> {
        if song.uri().starts_with("fail://") {
            return Err(Error::decoder(song.uri(), "unsupported codec"));
        }

        let duration = song.duration().unwrap_or(SongTime::from_millis(500));
        let total = TEST_FORMAT.time_to_frames(duration);
        let position = TEST_FORMAT.time_to_frames(start).min(total);

        Ok(Box::new(ToneInstance {
            amplitude: amplitude_for(song.uri()),
            replay_gain: song.tag().replay_gain,
            position,
            total,
        }))
    }
}

struct ToneInstance {
    amplitude: f32,
    replay_gain: Option<chorus_common::ReplayGainInfo>,
    position: u64,
    total: u64,
}

impl DecoderInstance for ToneInstance {
    fn format(&self) -> AudioFormat {
        TEST_FORMAT
    }

    fn duration(&self) -> Option<SongTime> {
        Some(TEST_FORMAT.frames_to_time(self.total))
    }

    fn decode(&mut self) -> Result<Option<DecodedBlock>> {
        if self.position >= self.total {
            return Ok(None);
        }

        let frames = (self.total - self.position).min(CHUNK_FRAMES as u64) as usize;
        self.position += frames as u64;

        Ok(Some(DecodedBlock {
            samples: vec![self.amplitude; frames * TEST_FORMAT.frame_size()],
            time: TEST_FORMAT.frames_to_time(self.position),
            bit_rate: 1411,
            tag: None,
            replay_gain: self.replay_gain,
        }))
    }
}

/// Loads `test://` songs with a configurable duration.
pub struct TestSongLoader {
    pub default_duration: SongTime,
    durations: Mutex<std::collections::HashMap<String, SongTime>>,
}

impl TestSongLoader {
    pub fn new(default_duration: SongTime) -> Self {
        Self {
            default_duration,
            durations: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_song(self, uri: &str, duration: SongTime) -> Self {
        self.durations
            .lock()
            .unwrap()
            .insert(uri.to_string(), duration);
        self
    }
}

impl SongLoader for TestSongLoader {
    fn load(&self, uri: &str) -> Result<DetachedSong> {
        if uri.starts_with("missing://") {
            return Err(Error::NoSuchSong(uri.to_string()));
        }

        let duration = self
            .durations
            .lock()
            .unwrap()
            .get(uri)
            .copied()
            .unwrap_or(self.default_duration);

        Ok(DetachedSong::new(uri).with_tag(Tag::builder().duration(duration).build()))
    }
}

/// Everything a recording output observed.
#[derive(Default)]
pub struct OutputLog {
    pub samples: Mutex<Vec<f32>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub begin_pauses: AtomicUsize,
    pub drains: AtomicUsize,
    pub open_attempts: AtomicUsize,
}

impl OutputLog {
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn samples(&self) -> Vec<f32> {
        self.samples.lock().unwrap().clone()
    }
}

/// How to build one recording output.
pub struct OutputSpec {
    pub name: String,
    pub supports_pause: bool,
    /// Number of initial `open` calls that fail
    pub fail_opens: usize,
    /// Cap on samples accepted per `play` call
    pub short_write: Option<usize>,
    /// Consume at wall-clock speed instead of instantly
    pub realtime: bool,
    pub with_mixer: bool,
    pub always_on: bool,
    pub reopen_after: Duration,
}

impl OutputSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            supports_pause: true,
            fail_opens: 0,
            short_write: None,
            realtime: false,
            with_mixer: false,
            always_on: false,
            reopen_after: Duration::from_millis(100),
        }
    }
}

/// Output plugin capturing all samples it plays.
pub struct RecordingOutput {
    log: Arc<OutputLog>,
    supports_pause: bool,
    fail_opens: usize,
    short_write: Option<usize>,
    realtime: bool,
    open: bool,
    until: Instant,
}

impl RecordingOutput {
    pub fn new(spec: &OutputSpec) -> (Self, Arc<OutputLog>) {
        let log = Arc::new(OutputLog::default());
        (
            Self {
                log: Arc::clone(&log),
                supports_pause: spec.supports_pause,
                fail_opens: spec.fail_opens,
                short_write: spec.short_write,
                realtime: spec.realtime,
                open: false,
                until: Instant::now(),
            },
            log,
        )
    }
}

impl OutputPlugin for RecordingOutput {
    fn plugin_name(&self) -> &'static str {
        "recording"
    }

    fn supports_pause(&self) -> bool {
        self.supports_pause
    }

    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        self.log.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens > 0 {
            self.fail_opens -= 1;
            return Err(Error::output("recording", "injected open failure"));
        }
        self.open = true;
        self.until = Instant::now();
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        Ok(format)
    }

    fn close(&mut self, _drain: bool) {
        self.open = false;
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn delay(&self) -> PlayDelay {
        if !self.realtime {
            return PlayDelay::Ready;
        }
        let now = Instant::now();
        if self.until <= now {
            PlayDelay::Ready
        } else {
            PlayDelay::For(self.until - now)
        }
    }

    fn play(&mut self, samples: &[f32]) -> Result<usize> {
        if !self.open {
            return Err(Error::output("recording", "not open"));
        }

        let mut n = self.short_write.unwrap_or(samples.len()).min(samples.len());
        // stay frame-aligned
        n -= n % TEST_FORMAT.frame_size();
        let n = n.max(TEST_FORMAT.frame_size()).min(samples.len());

        self.log.samples.lock().unwrap().extend_from_slice(&samples[..n]);

        if self.realtime {
            let now = Instant::now();
            if self.until < now {
                self.until = now;
            }
            self.until += TEST_FORMAT.samples_to_duration(n);
        }

        Ok(n)
    }

    fn drain(&mut self) -> Result<()> {
        self.log.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&mut self) {
        self.until = Instant::now();
    }

    fn begin_pause(&mut self) {
        self.log.begin_pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn iterate_pause(&mut self) -> Result<()> {
        if !self.supports_pause {
            return Err(Error::output("recording", "pause not supported"));
        }
        std::thread::sleep(Duration::from_millis(2));
        Ok(())
    }
}

/// A fully wired partition with recording outputs and a tone decoder.
pub struct TestEngine {
    pub partition: Arc<Partition>,
    pub logs: Vec<Arc<OutputLog>>,
    pub bus: EventBus,
    pub loader: TestSongLoader,
}

impl TestEngine {
    pub fn build(specs: Vec<OutputSpec>) -> Self {
        Self::build_with_config(specs, PartitionConfig::default())
    }

    pub fn build_with_config(specs: Vec<OutputSpec>, mut config: PartitionConfig) -> Self {
        // keep the pipe small so tests exercise backpressure quickly
        config.player.buffer_chunks = 32;

        let bus = EventBus::new(256);
        let mut logs = Vec::new();
        let mut outputs = Vec::new();

        for spec in &specs {
            let (device, log) = RecordingOutput::new(spec);
            logs.push(log);

            let mut output_config = OutputConfig::new(&spec.name);
            output_config.always_on = spec.always_on;
            output_config.reopen_after = spec.reopen_after;

            let mixer = spec
                .with_mixer
                .then(|| Arc::new(Mixer::new(Box::new(NullMixer::default()), false)));

            outputs.push((
                output_config,
                Some(Box::new(device) as Box<dyn OutputPlugin>),
                mixer,
            ));
        }

        let partition = Partition::new(
            "default",
            config,
            outputs,
            Arc::new(ToneDecoder),
            bus.clone(),
        );

        Self {
            partition,
            logs,
            bus,
            loader: TestSongLoader::new(SongTime::from_millis(200)),
        }
    }

    pub fn append(&self, uri: &str) -> u32 {
        self.partition
            .append_uri(&self.loader, uri)
            .expect("append failed")
    }

    /// Dispatch partition events until `cond` holds (or panic on timeout).
    pub fn pump_until(&self, what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + timeout;
        loop {
            self.partition.dispatch_pending();
            if cond() {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn shutdown(&self) {
        self.partition.begin_shutdown();
    }
}

/// Accumulate all idle bits currently queued on the bus.
pub fn drain_idle(rx: &mut broadcast::Receiver<EngineEvent>) -> IdleMask {
    let mut mask = IdleMask::NONE;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Idle { mask: m, .. } = event {
            mask |= m;
        }
    }
    mask
}

/// Expected frame count for a song of `duration`.
pub fn frames_for(duration: SongTime) -> u64 {
    TEST_FORMAT.time_to_frames(duration)
}

/// Expected sample count for a song of `duration`.
pub fn samples_for(duration: SongTime) -> usize {
    frames_for(duration) as usize * TEST_FORMAT.frame_size()
}
