//! Aggregate over all output controllers.
//!
//! `MultipleOutputs` owns the controllers and the shared music pipe and
//! implements the contract the player thread consumes. Broadcast
//! operations never abort on a partial failure: a device that cannot
//! open records its error and the rest keep playing.

use crate::chunk::MusicChunk;
use crate::config::{OutputConfig, PlayerConfig};
use crate::error::{Error, Result};
use crate::mixer::Mixer;
use crate::output::control::{OutputClient, OutputControl, OutputListener, OutputStatus};
use crate::output::plugin::OutputPlugin;
use crate::pipe::MusicPipe;
use chorus_common::{AudioFormat, ReplayGainMode};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

pub struct MultipleOutputs {
    controls: Vec<Arc<OutputControl>>,
    pipe: Arc<MusicPipe>,
    input_format: Mutex<Option<AudioFormat>>,
}

impl MultipleOutputs {
    /// Build the output set from configuration.
    ///
    /// A `None` device creates a dummy controller that can be bound later
    /// with [`OutputControl::replace_dummy`].
    pub fn new(
        player_config: &PlayerConfig,
        outputs: Vec<(
            OutputConfig,
            Option<Box<dyn OutputPlugin>>,
            Option<Arc<Mixer>>,
        )>,
    ) -> Arc<Self> {
        let pipe = Arc::new(MusicPipe::new(player_config.buffer_chunks));

        let controls = outputs
            .into_iter()
            .enumerate()
            .map(|(id, (config, device, mixer))| {
                OutputControl::new(id, config, player_config, device, mixer)
            })
            .collect();

        Arc::new(Self {
            controls,
            pipe,
            input_format: Mutex::new(None),
        })
    }

    /// Late-bind the client callback set (the player control).
    pub fn set_client(&self, client: Weak<dyn OutputClient>) {
        for control in &self.controls {
            control.set_client(Weak::clone(&client));
        }
    }

    /// Late-bind the failure listener (the partition).
    pub fn set_listener(&self, listener: Weak<dyn OutputListener>) {
        for control in &self.controls {
            control.set_listener(Weak::clone(&listener));
        }
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<OutputControl>> {
        self.controls.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Arc<OutputControl>> {
        self.controls.iter().find(|c| c.name() == name)
    }

    pub fn pipe(&self) -> &Arc<MusicPipe> {
        &self.pipe
    }

    pub fn statuses(&self) -> Vec<OutputStatus> {
        self.controls.iter().map(|c| c.status()).collect()
    }

    /// Wait until every controller has acknowledged its pending command.
    fn wait_all(&self) {
        for control in &self.controls {
            control.lock_wait_command_finished();
        }
    }

    /// Reconcile the desired `enabled` flags across all controllers.
    pub fn enable_disable(&self) {
        for control in &self.controls {
            control.lock_enable_disable_async();
        }
        self.wait_all();
    }

    /// Re-apply enabled flags and reopen outputs as needed (used after
    /// configuration changes and `replace_dummy`).
    pub fn apply_enabled(&self) {
        self.enable_disable();
        self.update(true);
    }

    /// Open the output set for `format`.
    ///
    /// Succeeds when at least one output opened; the others keep their
    /// per-controller `last_error`.
    pub fn open(&self, format: AudioFormat) -> Result<()> {
        *self.input_format.lock().unwrap() = Some(format);

        self.enable_disable();

        let mut opened = false;
        for control in &self.controls {
            if control.lock_update(format, &self.pipe, true) {
                opened = true;
            }
        }

        if opened {
            debug!("outputs open at {format}");
            Ok(())
        } else {
            let detail = self
                .controls
                .iter()
                .find_map(|c| c.lock_get_error())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no audio outputs configured".to_string());
            Err(Error::Output {
                name: "all".into(),
                message: detail,
            })
        }
    }

    /// Retry opening enabled outputs; returns true if any output is open.
    pub fn update(&self, force: bool) -> bool {
        let format = *self.input_format.lock().unwrap();
        let Some(format) = format else {
            return false;
        };

        let mut any = false;
        for control in &self.controls {
            if control.lock_update(format, &self.pipe, force) {
                any = true;
            }
        }
        any
    }

    /// Submit a chunk to every open output.
    ///
    /// Fails when no output is open; individual device failures stay in
    /// the per-controller `last_error`.
    pub fn play(&self, chunk: MusicChunk) -> Result<u64> {
        if !self.controls.iter().any(|c| c.is_open()) {
            return Err(Error::Output {
                name: "all".into(),
                message: "no open audio outputs".into(),
            });
        }

        let seq = self.pipe.push(chunk)?;

        for control in &self.controls {
            if control.is_open() {
                control.lock_play();
            }
        }

        Ok(seq)
    }

    /// Number of chunks still buffered in the pipe.
    pub fn check_pipe(&self) -> usize {
        self.pipe.len()
    }

    /// Enter device pause on all open outputs.
    pub fn pause(&self) {
        self.update(false);
        for control in &self.controls {
            control.lock_pause_async();
        }
    }

    /// Drain pending audio through all open outputs.
    pub fn drain(&self) {
        for control in &self.controls {
            control.lock_drain_async();
        }
        self.wait_all();
    }

    /// Discard all in-flight audio, then permit playback again.
    pub fn cancel(&self) {
        for control in &self.controls {
            control.lock_cancel_async();
        }
        self.wait_all();

        self.pipe.clear();

        for control in &self.controls {
            control.lock_allow_play();
        }
    }

    /// Close or pause (always_on) all outputs.
    pub fn release(&self) {
        for control in &self.controls {
            control.lock_release();
        }
    }

    /// Synchronously close all outputs and forget the input format.
    pub fn close(&self) {
        for control in &self.controls {
            control.lock_close_wait();
        }
        *self.input_format.lock().unwrap() = None;
        self.pipe.clear();
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        for control in &self.controls {
            control.set_replay_gain_mode(mode);
        }
    }

    /// Average volume over all reporting mixers, in percent.
    pub fn get_volume(&self) -> Option<u32> {
        let mut total = 0u32;
        let mut count = 0u32;
        for control in &self.controls {
            if let Some(mixer) = control.mixer() {
                match mixer.lock_get_volume() {
                    Ok(Some(volume)) => {
                        total += volume;
                        count += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("failed to read volume on {:?}: {e}", control.name()),
                }
            }
        }

        if count > 0 {
            Some(total / count)
        } else {
            None
        }
    }

    /// Set the volume on every mixer; succeeds if at least one accepted.
    pub fn set_volume(&self, volume: u32) -> Result<()> {
        if volume > 100 {
            return Err(Error::Argument(format!("volume out of range: {volume}")));
        }

        let mut success = false;
        let mut last_error = None;
        for control in &self.controls {
            if let Some(mixer) = control.mixer() {
                match mixer.lock_set_volume(volume) {
                    Ok(()) => success = true,
                    Err(e) => {
                        warn!("failed to set volume on {:?}: {e}", control.name());
                        last_error = Some(e);
                    }
                }
            }
        }

        if success {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| Error::Mixer("no mixer available".into())))
        }
    }

    /// Ask all workers to exit and join their threads.
    pub fn stop_all(&self) {
        for control in &self.controls {
            control.begin_destroy();
        }
        for control in &self.controls {
            control.stop_thread();
        }
        self.pipe.clear();
    }
}

impl std::fmt::Debug for MultipleOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipleOutputs")
            .field("outputs", &self.controls.len())
            .finish_non_exhaustive()
    }
}
