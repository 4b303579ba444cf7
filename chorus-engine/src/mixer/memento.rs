//! Per-partition mixer state memento.

use crate::error::{Error, Result};
use crate::output::MultipleOutputs;

/// Remembers the partition's target volume across output and mixer
/// lifecycles, so a reopened mixer comes back at the level the user chose.
#[derive(Debug, Default)]
pub struct MixerMemento {
    last_volume: Option<u32>,
}

impl MixerMemento {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current volume in percent, averaged over all reporting mixers.
    ///
    /// Falls back to the remembered value when no mixer can report.
    pub fn get_volume(&mut self, outputs: &MultipleOutputs) -> Option<u32> {
        match outputs.get_volume() {
            Some(volume) => {
                self.last_volume = Some(volume);
                Some(volume)
            }
            None => self.last_volume,
        }
    }

    /// Set the volume on all outputs and remember it.
    pub fn set_volume(&mut self, outputs: &MultipleOutputs, volume: u32) -> Result<()> {
        if volume > 100 {
            return Err(Error::Argument(format!("volume out of range: {volume}")));
        }

        self.last_volume = Some(volume);
        outputs.set_volume(volume)
    }

    pub fn last_volume(&self) -> Option<u32> {
        self.last_volume
    }
}
