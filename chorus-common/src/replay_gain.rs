//! Replay-gain metadata and scale computation.

use serde::{Deserialize, Serialize};

/// Client-selectable replay-gain mode.
///
/// `Auto` is resolved by the partition to `Album` or `Track` depending on the
/// current playback order before it reaches the outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Album,
    Track,
    Auto,
}

impl ReplayGainMode {
    /// Resolve `Auto` against the current playback order.
    ///
    /// Random order favours per-track gain; sequential order favours album
    /// gain so an album plays with its intended dynamics.
    pub fn resolve_auto(self, random: bool) -> ReplayGainMode {
        match self {
            ReplayGainMode::Auto if random => ReplayGainMode::Track,
            ReplayGainMode::Auto => ReplayGainMode::Album,
            other => other,
        }
    }
}

/// One gain/peak pair as stored in a song's tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    /// Suggested gain adjustment in dB
    pub gain_db: f32,

    /// Peak sample amplitude (1.0 = full scale); 0 when unknown
    pub peak: f32,
}

impl ReplayGainTuple {
    pub fn new(gain_db: f32, peak: f32) -> Self {
        Self { gain_db, peak }
    }

    /// Compute the linear scale factor for this tuple.
    ///
    /// `preamp` is added to the tag gain. When `limit` is set the scale is
    /// capped so that the known peak does not clip.
    pub fn calc_scale(&self, preamp_db: f32, limit: bool) -> f32 {
        let mut scale = 10f32.powf((self.gain_db + preamp_db) / 20.0);
        if limit && self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

/// Replay-gain information attached to a decoded song.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    pub album: Option<ReplayGainTuple>,
    pub track: Option<ReplayGainTuple>,
}

impl ReplayGainInfo {
    pub fn is_defined(&self) -> bool {
        self.album.is_some() || self.track.is_some()
    }

    /// Pick the tuple matching the (resolved) mode, falling back to the
    /// other tuple when the preferred one is missing.
    pub fn tuple_for(&self, mode: ReplayGainMode) -> Option<ReplayGainTuple> {
        match mode {
            ReplayGainMode::Off => None,
            ReplayGainMode::Album | ReplayGainMode::Auto => self.album.or(self.track),
            ReplayGainMode::Track => self.track.or(self.album),
        }
    }

    /// Linear scale for this info under `mode`.
    ///
    /// Songs without any replay-gain data get `missing_preamp_db` applied so
    /// tagged and untagged material plays at comparable loudness.
    pub fn calc_scale(
        &self,
        mode: ReplayGainMode,
        preamp_db: f32,
        missing_preamp_db: f32,
        limit: bool,
    ) -> f32 {
        if mode == ReplayGainMode::Off {
            return 1.0;
        }

        match self.tuple_for(mode) {
            Some(tuple) => tuple.calc_scale(preamp_db, limit),
            None => 10f32.powf(missing_preamp_db / 20.0),
        }
    }
}
