//! Engine configuration structs.
//!
//! Plain serde-deserializable values; loading them from disk is the
//! embedder's concern. Defaults match the long-standing behaviour of the
//! engine (4 seconds of buffered chunks, 10 second output reopen backoff).

use chorus_common::SongTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Frames per produced chunk. Roughly 23ms at 44.1kHz.
pub const CHUNK_FRAMES: usize = 1024;

fn default_buffer_chunks() -> usize {
    172 // ~4s of 1024-frame chunks at 44.1kHz
}

fn default_reopen_after() -> Duration {
    Duration::from_secs(10)
}

/// Player-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Soft bound on the number of chunks buffered in the music pipe
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,

    /// Replay-gain preamp for tagged songs, in dB
    #[serde(default)]
    pub replay_gain_preamp_db: f32,

    /// Replay-gain preamp for songs without replay-gain tags, in dB
    #[serde(default)]
    pub replay_gain_missing_preamp_db: f32,

    /// Prevent replay-gain from amplifying past the known peak
    #[serde(default = "default_true")]
    pub replay_gain_limit: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: default_buffer_chunks(),
            replay_gain_preamp_db: 0.0,
            replay_gain_missing_preamp_db: 0.0,
            replay_gain_limit: true,
        }
    }
}

impl PlayerConfig {
    /// Pipe fill level below which the player refills eagerly.
    pub fn refill_threshold(&self) -> usize {
        (self.buffer_chunks / 2).max(1)
    }
}

/// Per-output configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output name as shown to clients
    pub name: String,

    /// Forward tags to the device (e.g. for streaming outputs)
    #[serde(default = "default_true")]
    pub tags: bool,

    /// Pause instead of closing the device when playback stops
    #[serde(default)]
    pub always_on: bool,

    /// Never enable this output, regardless of the enabled flag
    #[serde(default)]
    pub always_off: bool,

    /// Initially enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backoff before automatically reopening a failed device
    #[serde(default = "default_reopen_after", with = "duration_millis")]
    pub reopen_after: Duration,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: true,
            always_on: false,
            always_off: false,
            enabled: true,
            reopen_after: default_reopen_after(),
        }
    }
}

/// Partition-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default)]
    pub player: PlayerConfig,

    /// Initial crossfade duration; zero disables crossfading
    #[serde(default)]
    pub cross_fade: CrossFadeConfig,
}

/// Crossfade parameters; inputs to the pure fade-length computation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CrossFadeConfig {
    /// Overlap duration between consecutive songs
    #[serde(default)]
    pub duration: SongTime,

    /// MixRamp threshold in dB; 0 disables MixRamp handling
    #[serde(default)]
    pub mixramp_db: f32,

    /// Silence inserted between MixRamp points
    #[serde(default)]
    pub mixramp_delay: SongTime,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PlayerConfig::default();
        assert_eq!(c.buffer_chunks, 172);
        assert_eq!(c.refill_threshold(), 86);
        assert!(c.replay_gain_limit);

        let o = OutputConfig::new("test");
        assert!(o.enabled);
        assert!(!o.always_on);
        assert_eq!(o.reopen_after, Duration::from_secs(10));
    }
}
