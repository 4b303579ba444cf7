//! Per-output filtering.
//!
//! Each output runs its chunks through a small chain: the replay-gain
//! filter (scale recomputed whenever the chunk's replay-gain serial
//! changes), the crossfade mix of the overlapping next-song chunk, and an
//! optional stateless output filter from the configuration. Filtering
//! operates on private copies; chunk payloads in the pipe are never
//! mutated.

use crate::chunk::MusicChunk;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use chorus_common::{ReplayGainInfo, ReplayGainMode};
use std::sync::Arc;

/// A stateless per-output filter, applied outside the controller mutex.
pub trait ChunkFilter: Send + Sync {
    fn apply(&self, samples: &mut Vec<f32>) -> Result<()>;
}

/// Replay-gain application with serial-keyed scale caching.
///
/// The scale is recomputed only when a chunk with a new replay-gain serial
/// arrives or the mode changes, so the hot path is a single multiply.
#[derive(Debug, Clone)]
pub struct ReplayGainFilter {
    mode: ReplayGainMode,
    preamp_db: f32,
    missing_preamp_db: f32,
    limit: bool,
    last_serial: Option<u64>,
    scale: f32,
}

impl ReplayGainFilter {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            mode: ReplayGainMode::Off,
            preamp_db: config.replay_gain_preamp_db,
            missing_preamp_db: config.replay_gain_missing_preamp_db,
            limit: config.replay_gain_limit,
            last_serial: None,
            scale: 1.0,
        }
    }

    pub fn mode(&self) -> ReplayGainMode {
        self.mode
    }

    /// Change the (already resolved) mode; invalidates the cached scale.
    pub fn set_mode(&mut self, mode: ReplayGainMode) {
        if mode != self.mode {
            self.mode = mode;
            self.last_serial = None;
            self.scale = 1.0;
        }
    }

    /// Refresh the cached scale for a chunk's replay-gain serial.
    pub fn update(&mut self, serial: u64, info: Option<&ReplayGainInfo>) {
        if self.last_serial == Some(serial) {
            return;
        }
        self.last_serial = Some(serial);
        self.scale = match (self.mode, info) {
            (ReplayGainMode::Off, _) => 1.0,
            (mode, Some(info)) => {
                info.calc_scale(mode, self.preamp_db, self.missing_preamp_db, self.limit)
            }
            (_, None) => 10f32.powf(self.missing_preamp_db / 20.0),
        };
    }

    pub fn apply(&self, samples: &mut [f32]) {
        if (self.scale - 1.0).abs() < f32::EPSILON {
            return;
        }
        for s in samples {
            *s *= self.scale;
        }
    }
}

/// Mix `other` into `data` with the given weight.
///
/// `ratio` 0.0 keeps only `data`, 1.0 keeps only `other`. Tail samples of
/// the longer buffer keep their own stream's weight.
pub fn mix_crossfade(data: &mut [f32], other: &[f32], ratio: f32) {
    let ratio = ratio.clamp(0.0, 1.0);
    let n = data.len().min(other.len());
    for i in 0..n {
        data[i] = data[i] * (1.0 - ratio) + other[i] * ratio;
    }
}

/// Run one chunk through an output's filter chain, producing the samples
/// to hand to the device.
pub fn render_chunk(
    chunk: &MusicChunk,
    rg: &mut ReplayGainFilter,
    other_rg: &mut ReplayGainFilter,
    output_filter: Option<&Arc<dyn ChunkFilter>>,
) -> Result<Vec<f32>> {
    let mut data = chunk.samples.clone();
    rg.update(chunk.rg_serial, chunk.replay_gain.as_ref());
    rg.apply(&mut data);

    if let Some(other) = &chunk.other {
        let mut mixed = other.samples.clone();
        other_rg.update(other.rg_serial, other.replay_gain.as_ref());
        other_rg.apply(&mut mixed);
        mix_crossfade(&mut data, &mixed, chunk.mix_ratio);
    }

    if let Some(filter) = output_filter {
        filter.apply(&mut data).map_err(|e| match e {
            Error::Filter { .. } => e,
            other => Error::Filter {
                name: "output".into(),
                message: other.to_string(),
            },
        })?;
    }

    Ok(data)
}
