//! Mixer layer.
//!
//! A `Mixer` wraps a hardware (or software) volume control behind its own
//! lock. Output controllers never touch mixers from their worker threads;
//! all mixer traffic comes from the client side, so the only permitted
//! lock order is controller mutex -> mixer mutex.

mod memento;

pub use memento::MixerMemento;

use crate::error::{Error, Result};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A volume-control implementation (ALSA mixer, software gain, ...).
pub trait MixerPlugin: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Current volume in percent, `None` when the device cannot report it.
    fn get_volume(&mut self) -> Result<Option<u32>>;

    fn set_volume(&mut self, volume: u32) -> Result<()>;
}

/// Raised towards the partition when mixer state changes.
pub trait MixerListener: Send + Sync {
    /// A mixer's volume changed to `volume` percent
    fn on_mixer_volume_changed(&self, volume: u32);

    /// The set of available mixers changed
    fn on_mixer_changed(&self);
}

struct MixerInner {
    plugin: Box<dyn MixerPlugin>,
    open: bool,
    /// Remembered while closed, applied on the next open
    pending_volume: Option<u32>,
    /// The most recent open failure, so every volume read does not retry a
    /// broken device
    failure: Option<Error>,
}

/// Shared volume control attached to an output.
pub struct Mixer {
    inner: Mutex<MixerInner>,

    /// Global mixers survive output close (exempt from auto-close)
    global: bool,
}

impl Mixer {
    pub fn new(plugin: Box<dyn MixerPlugin>, global: bool) -> Self {
        Self {
            inner: Mutex::new(MixerInner {
                plugin,
                open: false,
                pending_volume: None,
                failure: None,
            }),
            global,
        }
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    pub fn lock_open(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open {
            return Ok(());
        }

        match inner.plugin.open() {
            Ok(()) => {
                inner.open = true;
                inner.failure = None;
                if let Some(volume) = inner.pending_volume.take() {
                    if let Err(e) = inner.plugin.set_volume(volume) {
                        warn!("failed to restore mixer volume: {e}");
                    }
                }
                Ok(())
            }
            Err(e) => {
                inner.failure = Some(e.clone());
                Err(e)
            }
        }
    }

    pub fn lock_close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.open {
            inner.plugin.close();
            inner.open = false;
            debug!("mixer closed");
        }
        inner.failure = None;
    }

    /// Close unless this mixer is global.
    pub fn lock_auto_close(&self) {
        if !self.global {
            self.lock_close();
        }
    }

    pub fn lock_get_volume(&self) -> Result<Option<u32>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(failure) = &inner.failure {
            return Err(failure.clone());
        }
        if !inner.open {
            return Ok(inner.pending_volume);
        }
        inner.plugin.get_volume()
    }

    pub fn lock_set_volume(&self, volume: u32) -> Result<()> {
        if volume > 100 {
            return Err(Error::Argument(format!("volume out of range: {volume}")));
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            // remember for the next open
            inner.pending_volume = Some(volume);
            return Ok(());
        }
        inner.plugin.set_volume(volume)
    }
}

/// Mixer plugin double that stores the volume in memory. Useful for
/// outputs without hardware volume and for tests.
pub struct NullMixer {
    volume: u32,
}

impl NullMixer {
    pub fn new(volume: u32) -> Self {
        Self { volume }
    }
}

impl Default for NullMixer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MixerPlugin for NullMixer {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn get_volume(&mut self) -> Result<Option<u32>> {
        Ok(Some(self.volume))
    }

    fn set_volume(&mut self, volume: u32) -> Result<()> {
        self.volume = volume;
        Ok(())
    }
}
