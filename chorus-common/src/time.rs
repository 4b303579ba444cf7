//! Song time primitives.
//!
//! Positions within a song are tracked in milliseconds. `SongTime` is
//! unsigned and used for absolute positions; `SignedSongTime` is used for
//! relative seeks, where a negative value moves backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Absolute position within a song, in milliseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SongTime(u64);

impl SongTime {
    pub const ZERO: SongTime = SongTime(0);

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(s: u64) -> Self {
        Self(s * 1000)
    }

    pub fn from_secs_f64(s: f64) -> Self {
        Self((s.max(0.0) * 1000.0) as u64)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(self, other: SongTime) -> SongTime {
        SongTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SongTime {
    type Output = SongTime;

    fn add(self, rhs: SongTime) -> SongTime {
        SongTime(self.0 + rhs.0)
    }
}

impl Sub for SongTime {
    type Output = SongTime;

    fn sub(self, rhs: SongTime) -> SongTime {
        SongTime(self.0.saturating_sub(rhs.0))
    }
}

impl From<SongTime> for Duration {
    fn from(t: SongTime) -> Duration {
        Duration::from_millis(t.0)
    }
}

impl fmt::Display for SongTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Relative song time, in milliseconds. Negative values move backwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SignedSongTime(i64);

impl SignedSongTime {
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub const fn from_secs(s: i64) -> Self {
        Self(s * 1000)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Apply this offset to an absolute position, clamping at zero.
    pub fn apply_to(self, base: SongTime) -> SongTime {
        if self.0 >= 0 {
            SongTime::from_millis(base.as_millis() + self.0 as u64)
        } else {
            SongTime::from_millis(base.as_millis().saturating_sub(self.0.unsigned_abs()))
        }
    }
}

impl From<SongTime> for SignedSongTime {
    fn from(t: SongTime) -> Self {
        Self(t.as_millis() as i64)
    }
}
