//! Output device plugin contract.
//!
//! Device implementations live outside the engine; the `NullOutput` here
//! is the one in-tree plugin, useful for deployments that need a sink
//! without hardware and as the reference for the timing contract.

use crate::error::{Error, Result};
use chorus_common::{AudioFormat, Tag};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Suggested wait before the next `play` call.
pub enum PlayDelay {
    /// The device can accept more audio right now
    Ready,
    /// Check again after this long
    For(Duration),
    /// Wait until an external wakeup (command or interrupt)
    Indefinite,
}

/// Unblocks an in-flight `play`/`drain`/`iterate_pause` from another
/// thread by making it fail with [`Error::Interrupted`].
///
/// Plugins whose blocking primitives cannot be interrupted natively must
/// wrap them with a self-pipe or equivalent.
pub trait Interrupter: Send + Sync {
    fn interrupt(&self);
}

/// Interrupter for devices that never block.
pub struct NullInterrupter;

impl Interrupter for NullInterrupter {
    fn interrupt(&self) {}
}

/// An audio output device.
///
/// All methods are called from the owning output worker thread with the
/// controller mutex released; only [`OutputPlugin::interrupter`] hands out
/// an object that other threads may use.
pub trait OutputPlugin: Send {
    fn plugin_name(&self) -> &'static str;

    fn supports_enable_disable(&self) -> bool {
        false
    }

    fn supports_pause(&self) -> bool {
        false
    }

    /// Claim the device without opening it (e.g. reserve exclusive access).
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn disable(&mut self) {}

    /// Open the device for `format`. The returned format is what the
    /// device actually runs at; a mismatch forces conversion upstream.
    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat>;

    /// Close the device. With `drain` set, play out buffered audio first.
    fn close(&mut self, drain: bool);

    fn delay(&self) -> PlayDelay {
        PlayDelay::Ready
    }

    /// Submit interleaved samples; returns how many were accepted.
    ///
    /// May accept fewer samples than submitted (the caller retries), but
    /// must accept at least one frame or fail.
    fn play(&mut self, samples: &[f32]) -> Result<usize>;

    /// Block until all buffered audio has been played.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard buffered audio without playing it.
    fn cancel(&mut self) {}

    fn begin_pause(&mut self) {}

    /// Keep the paused device alive; called in a loop while paused.
    fn iterate_pause(&mut self) -> Result<()> {
        Err(Error::output(self.plugin_name(), "pause not supported"))
    }

    fn end_pause(&mut self) {}

    fn send_tag(&mut self, _tag: &Tag) -> Result<()> {
        Ok(())
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        Arc::new(NullInterrupter)
    }
}

/// Discards all audio.
///
/// With `sync` set it consumes samples at wall-clock speed like a real
/// device; without it, playback runs as fast as the decoder.
pub struct NullOutput {
    sync: bool,
    format: Option<AudioFormat>,
    /// Virtual device clock: everything before this instant has "played"
    until: Instant,
}

impl NullOutput {
    pub fn new(sync: bool) -> Self {
        Self {
            sync,
            format: None,
            until: Instant::now(),
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OutputPlugin for NullOutput {
    fn plugin_name(&self) -> &'static str {
        "null"
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn open(&mut self, format: AudioFormat) -> Result<AudioFormat> {
        self.format = Some(format);
        self.until = Instant::now();
        Ok(format)
    }

    fn close(&mut self, _drain: bool) {
        self.format = None;
    }

    fn delay(&self) -> PlayDelay {
        if !self.sync {
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
        let format = self
            .format
            .ok_or_else(|| Error::output("null", "not open"))?;
        if self.sync {
            let now = Instant::now();
            if self.until < now {
                self.until = now;
            }
            self.until += format.samples_to_duration(samples.len());
        }
        Ok(samples.len())
    }

    fn drain(&mut self) -> Result<()> {
        if self.sync {
            let now = Instant::now();
            if self.until > now {
                std::thread::sleep(self.until - now);
            }
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.until = Instant::now();
    }

    fn begin_pause(&mut self) {}

    fn iterate_pause(&mut self) -> Result<()> {
        // nothing to keep alive, but pacing the loop avoids spinning
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }
}
