//! Audio chunks.
//!
//! A `MusicChunk` is an immutable fragment of decoded PCM on its way from
//! the player thread to the outputs. Once pushed into the pipe the payload
//! is never mutated; outputs apply their filters to private copies.

use chorus_common::{AudioFormat, ReplayGainInfo, SongTime, Tag};
use std::sync::Arc;

/// One immutable audio fragment.
#[derive(Debug, Clone)]
pub struct MusicChunk {
    /// Monotonic sequence id, assigned by the pipe on push; 0 before that
    pub seq: u64,

    /// Format of `samples`; a change forces the outputs to reopen
    pub format: AudioFormat,

    /// Interleaved f32 PCM
    pub samples: Vec<f32>,

    /// Song position at the end of this chunk
    pub time: Option<SongTime>,

    /// Source bit rate in kbit/s, for status reporting
    pub bit_rate: u32,

    /// Tag that became current with this chunk
    pub tag: Option<Arc<Tag>>,

    /// Replay-gain data of the song this chunk belongs to
    pub replay_gain: Option<ReplayGainInfo>,

    /// Bumped whenever `replay_gain` refers to a different song, so
    /// per-output filters know when to recompute their scale
    pub rg_serial: u64,

    /// Crossfade overlap: head chunk of the next song to be mixed in
    pub other: Option<Box<MusicChunk>>,

    /// Weight of `other` in the mix (0.0 = only this chunk, 1.0 = only the
    /// next song); meaningless when `other` is `None`
    pub mix_ratio: f32,
}

impl MusicChunk {
    pub fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
        Self {
            seq: 0,
            format,
            samples,
            time: None,
            bit_rate: 0,
            tag: None,
            replay_gain: None,
            rg_serial: 0,
            other: None,
            mix_ratio: 0.0,
        }
    }

    /// Number of whole frames in this chunk.
    pub fn frames(&self) -> usize {
        self.format.frames_in(self.samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() {
        let fmt = AudioFormat::new(44100, 2);
        let chunk = MusicChunk::new(fmt, vec![0.0; 2048]);
        assert_eq!(chunk.frames(), 1024);
        assert!(!chunk.is_empty());
    }
}
