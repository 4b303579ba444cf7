//! Audio format description.
//!
//! All PCM handled by the engine is interleaved `f32` samples; a format
//! therefore only carries the sample rate and channel count. Chunks keep a
//! copy of their format so that a mid-stream format change can force the
//! outputs to reopen.

use crate::error::{Error, Result};
use crate::time::SongTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// PCM stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of interleaved channels (1 = mono, 2 = stereo)
    pub channels: u8,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Check that both fields are non-zero and within sane bounds.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > 768_000 {
            return Err(Error::Format(format!(
                "sample rate out of range: {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 32 {
            return Err(Error::Format(format!(
                "channel count out of range: {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Samples per frame (= channel count).
    pub fn frame_size(&self) -> usize {
        self.channels as usize
    }

    /// Number of frames in an interleaved sample slice.
    ///
    /// Truncates a trailing partial frame.
    pub fn frames_in(&self, samples: usize) -> usize {
        samples / self.frame_size()
    }

    /// Convert a frame count to the song time it spans.
    pub fn frames_to_time(&self, frames: u64) -> SongTime {
        SongTime::from_millis(frames * 1000 / u64::from(self.sample_rate))
    }

    /// Convert a song time to a frame count.
    pub fn time_to_frames(&self, t: SongTime) -> u64 {
        t.as_millis() * u64::from(self.sample_rate) / 1000
    }

    /// Playback duration of an interleaved sample slice.
    pub fn samples_to_duration(&self, samples: usize) -> Duration {
        let frames = self.frames_in(samples) as u64;
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate))
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:f32:{}", self.sample_rate, self.channels)
    }
}
