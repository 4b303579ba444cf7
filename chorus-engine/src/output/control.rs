//! Output controller: client-side surface.
//!
//! One controller per configured output device. The worker thread (see
//! `worker`) owns the device; clients talk to it through a single-slot
//! command mailbox. `command == None` means the previous command has been
//! acknowledged; only one synchronous command is ever in flight per
//! controller.
//!
//! A controller may be created as a dummy (no device bound); a dummy never
//! has `really_enabled`, `open` or a running thread until `replace_dummy`
//! binds a device.

use crate::config::{OutputConfig, PlayerConfig};
use crate::error::Error;
use crate::mixer::Mixer;
use crate::output::plugin::{Interrupter, OutputPlugin};
use crate::output::source::OutputSource;
use crate::pipe::MusicPipe;
use crate::sync::WorkerCell;
use chorus_common::{AudioFormat, ReplayGainMode};
use serde::Serialize;
use std::sync::{Arc, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Commands accepted by the output worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum OutputCommand {
    #[default]
    None,
    Enable,
    Disable,
    Open,
    Close,
    Pause,
    Drain,
    Cancel,
    Release,
    Kill,
}

/// Callbacks from output workers towards the player.
pub trait OutputClient: Send + Sync {
    /// Chunks have been consumed; the producer may refill the pipe
    fn chunks_consumed(&self);

    /// The set of enabled outputs should be reconciled
    fn apply_enabled(&self);
}

/// Callbacks from output workers towards the partition.
pub trait OutputListener: Send + Sync {
    /// A device failed; its controller armed the reopen backoff
    fn on_output_error(&self);
}

pub(super) struct OpenRequest {
    pub(super) format: AudioFormat,
    pub(super) pipe: Arc<MusicPipe>,
}

/// Controller state behind the mutex.
pub(super) struct OutputState {
    pub(super) command: OutputCommand,

    /// Present while no worker thread runs; the worker takes it at
    /// startup and returns it on KILL
    pub(super) device: Option<Box<dyn OutputPlugin>>,
    pub(super) dummy: bool,
    pub(super) plugin_name: &'static str,
    pub(super) supports_enable_disable: bool,
    pub(super) supports_pause: bool,
    pub(super) interrupter: Option<Arc<dyn Interrupter>>,
    pub(super) mixer: Option<Arc<Mixer>>,

    pub(super) request: Option<OpenRequest>,

    /// Desired state, set by clients
    pub(super) enabled: bool,
    /// Actual state on the device
    pub(super) really_enabled: bool,

    pub(super) open: bool,
    /// Format the device is currently open with
    pub(super) device_format: Option<AudioFormat>,
    /// Audio has been submitted since the last pause/drain; a DRAIN is
    /// only meaningful while this is set
    pub(super) playing: bool,
    pub(super) pause: bool,

    pub(super) allow_play: bool,
    pub(super) in_playback_loop: bool,
    pub(super) woken_for_play: bool,
    pub(super) killed: bool,
    pub(super) caught_interrupted: bool,
    pub(super) skip_delay: bool,
    pub(super) should_reopen: bool,

    pub(super) source: OutputSource,

    /// Armed on failure; guards automatic reopen
    pub(super) fail_timer: Option<Instant>,
    pub(super) last_error: Option<Error>,

    pub(super) thread: Option<JoinHandle<()>>,
}

/// Per-device coordinator: command mailbox plus worker thread.
pub struct OutputControl {
    pub(super) name: String,
    pub(super) config: OutputConfig,
    pub(super) cell: WorkerCell<OutputState>,
    pub(super) client: OnceLock<Weak<dyn OutputClient>>,
    pub(super) listener: OnceLock<Weak<dyn OutputListener>>,
    pub(super) consumer_id: usize,
    /// Back-reference handed to the worker thread at startup
    self_ref: OnceLock<Weak<OutputControl>>,
}

impl OutputControl {
    /// Create a controller, optionally binding a device immediately.
    pub fn new(
        consumer_id: usize,
        config: OutputConfig,
        player_config: &PlayerConfig,
        device: Option<Box<dyn OutputPlugin>>,
        mixer: Option<Arc<Mixer>>,
    ) -> Arc<Self> {
        let name = config.name.clone();
        let enabled = config.enabled;
        let dummy = device.is_none();
        let (plugin_name, supports_enable_disable, supports_pause, interrupter) = match &device {
            Some(d) => (
                d.plugin_name(),
                d.supports_enable_disable(),
                d.supports_pause(),
                Some(d.interrupter()),
            ),
            None => ("dummy", false, false, None),
        };

        let control = Arc::new(Self {
            name,
            config,
            cell: WorkerCell::new(OutputState {
                command: OutputCommand::None,
                device,
                dummy,
                plugin_name,
                supports_enable_disable,
                supports_pause,
                interrupter,
                mixer,
                request: None,
                enabled,
                really_enabled: false,
                open: false,
                device_format: None,
                playing: false,
                pause: false,
                allow_play: true,
                in_playback_loop: false,
                woken_for_play: false,
                killed: false,
                caught_interrupted: false,
                skip_delay: false,
                should_reopen: false,
                source: OutputSource::new(consumer_id, player_config),
                fail_timer: None,
                last_error: None,
                thread: None,
            }),
            client: OnceLock::new(),
            listener: OnceLock::new(),
            consumer_id,
            self_ref: OnceLock::new(),
        });
        let _ = control.self_ref.set(Arc::downgrade(&control));
        control
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consumer_id(&self) -> usize {
        self.consumer_id
    }

    pub(crate) fn set_client(&self, client: Weak<dyn OutputClient>) {
        let _ = self.client.set(client);
    }

    pub(super) fn client(&self) -> Option<Arc<dyn OutputClient>> {
        self.client.get().and_then(Weak::upgrade)
    }

    pub(crate) fn set_listener(&self, listener: Weak<dyn OutputListener>) {
        let _ = self.listener.set(listener);
    }

    pub(super) fn notify_error(&self) {
        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.on_output_error();
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.cell.lock().dummy
    }

    /// Bind a real device to a dummy controller (used by reconfiguration).
    pub fn replace_dummy(&self, device: Box<dyn OutputPlugin>, mixer: Option<Arc<Mixer>>, enabled: bool) {
        {
            let mut g = self.cell.lock();
            assert!(g.dummy, "replace_dummy on a bound output");
            assert!(g.thread.is_none());

            g.plugin_name = device.plugin_name();
            g.supports_enable_disable = device.supports_enable_disable();
            g.supports_pause = device.supports_pause();
            g.interrupter = Some(device.interrupter());
            g.device = Some(device);
            g.mixer = mixer;
            g.dummy = false;
            g.enabled = enabled;
        }

        if let Some(client) = self.client() {
            client.apply_enabled();
        }
    }

    pub fn mixer(&self) -> Option<Arc<Mixer>> {
        self.cell.lock().mixer.clone()
    }

    /// Record the desired enabled state; returns true iff it changed.
    pub fn lock_set_enabled(&self, new_value: bool) -> bool {
        let mut g = self.cell.lock();
        if new_value == g.enabled {
            return false;
        }
        g.enabled = new_value;
        true
    }

    /// Flip the desired enabled state; returns the new value.
    pub fn lock_toggle_enabled(&self) -> bool {
        let mut g = self.cell.lock();
        g.enabled = !g.enabled;
        g.enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.cell.lock().enabled
    }

    pub fn is_open(&self) -> bool {
        self.cell.lock().open
    }

    pub fn lock_get_error(&self) -> Option<Error> {
        self.cell.lock().last_error.clone()
    }

    pub fn status(&self) -> OutputStatus {
        let g = self.cell.lock();
        OutputStatus {
            name: self.name.clone(),
            plugin: g.plugin_name.to_string(),
            enabled: g.enabled,
            open: g.open,
            error: g.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    // ----- command plumbing -----

    pub(super) fn command_finished(&self, g: &mut MutexGuard<'_, OutputState>) {
        debug_assert!(g.command != OutputCommand::None);
        g.command = OutputCommand::None;
        self.cell.notify_clients();
    }

    /// Post a command, first waiting out any still-unacknowledged one.
    fn command_async<'a>(
        &'a self,
        mut g: MutexGuard<'a, OutputState>,
        cmd: OutputCommand,
    ) -> MutexGuard<'a, OutputState> {
        while g.command != OutputCommand::None {
            g = self.cell.wait_client(g);
        }
        g.command = cmd;
        self.cell.notify_worker();
        g
    }

    fn command_wait<'a>(
        &'a self,
        g: MutexGuard<'a, OutputState>,
        cmd: OutputCommand,
    ) -> MutexGuard<'a, OutputState> {
        let mut g = self.command_async(g, cmd);
        while g.command != OutputCommand::None {
            g = self.cell.wait_client(g);
        }
        g
    }

    /// Wait until any in-flight command has been acknowledged.
    pub fn lock_wait_command_finished(&self) {
        let mut g = self.cell.lock();
        while g.command != OutputCommand::None {
            g = self.cell.wait_client(g);
        }
    }

    fn start_thread(&self, g: &mut MutexGuard<'_, OutputState>) -> std::io::Result<()> {
        debug_assert!(g.thread.is_none());
        debug_assert!(!g.dummy);
        debug_assert!(g.command == OutputCommand::None);

        g.killed = false;
        let ctrl = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("output controller dropped");
        let handle = std::thread::Builder::new()
            .name(format!("output:{}", self.name))
            .spawn(move || super::worker::task(ctrl))?;
        g.thread = Some(handle);
        debug!("output thread started for {:?}", self.name);
        Ok(())
    }

    // ----- enable/disable -----

    /// Reconcile `enabled` into `really_enabled` without blocking.
    pub fn lock_enable_disable_async(&self) {
        let g = self.cell.lock();
        if g.enabled == g.really_enabled {
            return;
        }

        if g.enabled {
            self.enable_async(g);
        } else {
            self.disable_async(g);
        }
    }

    fn enable_async(&self, mut g: MutexGuard<'_, OutputState>) {
        if g.dummy || self.config.always_off {
            return;
        }

        if g.thread.is_none() {
            if !g.supports_enable_disable {
                // no thread needed just to flip a variable
                g.really_enabled = true;
                return;
            }

            if let Err(e) = self.start_thread(&mut g) {
                error!("failed to start output thread for {:?}: {e}", self.name);
                return;
            }
        }

        let _g = self.command_async(g, OutputCommand::Enable);
    }

    fn disable_async(&self, mut g: MutexGuard<'_, OutputState>) {
        if g.dummy {
            return;
        }

        if g.thread.is_none() {
            if !g.supports_enable_disable {
                g.really_enabled = false;
            } else {
                // without a thread the device can never have been enabled
                debug_assert!(!g.really_enabled);
            }
            return;
        }

        let _g = self.command_async(g, OutputCommand::Disable);
    }

    // ----- open/close -----

    fn open_locked<'a>(
        &'a self,
        mut g: MutexGuard<'a, OutputState>,
        format: AudioFormat,
        pipe: &Arc<MusicPipe>,
    ) -> bool {
        debug_assert!(g.allow_play);

        g.fail_timer = None;

        if g.open
            && g.request.as_ref().map(|r| r.format) == Some(format)
            && !g.pause
            && !g.should_reopen
        {
            // already open with the right parameters
            return true;
        }

        g.request = Some(OpenRequest {
            format,
            pipe: Arc::clone(pipe),
        });

        if g.thread.is_none() {
            if let Err(e) = self.start_thread(&mut g) {
                error!("failed to start output thread for {:?}: {e}", self.name);
                return false;
            }
        }

        g = self.command_wait(g, OutputCommand::Open);
        let open = g.open;
        let mixer = g.mixer.clone();
        drop(g);

        if open {
            if let Some(mixer) = mixer {
                if let Err(e) = mixer.lock_open() {
                    warn!("failed to open mixer for {:?}: {e}", self.name);
                }
            }
        }

        open
    }

    fn close_wait_locked<'a>(
        &'a self,
        mut g: MutexGuard<'a, OutputState>,
    ) -> MutexGuard<'a, OutputState> {
        debug_assert!(g.allow_play);

        if g.dummy {
            return g;
        }

        if let Some(mixer) = g.mixer.clone() {
            mixer.lock_auto_close();
        }

        debug_assert!(!g.open || g.fail_timer.is_none());

        if g.open {
            g = self.command_wait(g, OutputCommand::Close);
        } else {
            g.fail_timer = None;
        }
        g
    }

    /// Open the device if enabled and the failure backoff has elapsed (or
    /// `force` is set); close it if disabled. Returns true iff open.
    pub fn lock_update(
        &self,
        format: AudioFormat,
        pipe: &Arc<MusicPipe>,
        force: bool,
    ) -> bool {
        let g = self.cell.lock();

        if g.enabled && g.really_enabled {
            let backoff_over = match g.fail_timer {
                None => true,
                Some(armed) => armed.elapsed() >= self.config.reopen_after,
            };
            if force || backoff_over {
                return self.open_locked(g, format, pipe);
            }
        } else if g.open {
            self.close_wait_locked(g);
        }

        false
    }

    // ----- playback control -----

    /// Wake the worker to consume more chunks.
    pub fn lock_play(&self) {
        let mut g = self.cell.lock();
        debug_assert!(g.allow_play);

        if g.open && !g.in_playback_loop && !g.woken_for_play {
            g.woken_for_play = true;
            self.cell.notify_worker();
        }
    }

    /// Enter device pause (or close the mixer when pause is unsupported).
    pub fn lock_pause_async(&self) {
        let (dummy, mixer, interrupter, supports_pause) = {
            let g = self.cell.lock();
            (g.dummy, g.mixer.clone(), g.interrupter.clone(), g.supports_pause)
        };

        if dummy {
            return;
        }

        if let (Some(mixer), false) = (&mixer, supports_pause) {
            // no pause mode: close the mixer unless it is global
            mixer.lock_auto_close();
        }

        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        let g = self.cell.lock();
        debug_assert!(g.allow_play);
        if g.open {
            let _g = self.command_async(g, OutputCommand::Pause);
        }
    }

    /// Drain pending audio through the device.
    pub fn lock_drain_async(&self) {
        let g = self.cell.lock();
        debug_assert!(g.allow_play);
        if g.open {
            let _g = self.command_async(g, OutputCommand::Drain);
        }
    }

    /// Discard in-flight audio; playback stays blocked until
    /// [`OutputControl::lock_allow_play`].
    pub fn lock_cancel_async(&self) {
        let interrupter = self.cell.lock().interrupter.clone();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        let mut g = self.cell.lock();
        if g.open {
            g.allow_play = false;
            let _g = self.command_async(g, OutputCommand::Cancel);
        }
    }

    pub fn lock_allow_play(&self) {
        let mut g = self.cell.lock();
        g.allow_play = true;
        if g.open {
            self.cell.notify_worker();
        }
    }

    /// Close the device, or pause it when `always_on` is set.
    pub fn lock_release(&self) {
        let (dummy, mixer, interrupter, supports_pause) = {
            let g = self.cell.lock();
            (g.dummy, g.mixer.clone(), g.interrupter.clone(), g.supports_pause)
        };

        if dummy {
            return;
        }

        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        if let Some(mixer) = &mixer {
            if !self.config.always_on || !supports_pause {
                mixer.lock_auto_close();
            }
        }

        let mut g = self.cell.lock();
        debug_assert!(!g.open || g.fail_timer.is_none());
        debug_assert!(g.allow_play);

        if g.open {
            let _g = self.command_wait(g, OutputCommand::Release);
        } else {
            g.fail_timer = None;
        }
    }

    /// Synchronous close.
    pub fn lock_close_wait(&self) {
        let interrupter = self.cell.lock().interrupter.clone();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        let g = self.cell.lock();
        self.close_wait_locked(g);
    }

    // ----- teardown -----

    /// Request KILL; the thread exits after the current command completes.
    pub fn begin_destroy(&self) {
        let (has_thread, interrupter) = {
            let g = self.cell.lock();
            (g.thread.is_some(), g.interrupter.clone())
        };
        if !has_thread {
            return;
        }

        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }

        let mut g = self.cell.lock();
        if g.thread.is_some() && !g.killed {
            g.killed = true;
            let _g = self.command_async(g, OutputCommand::Kill);
        }
    }

    /// Request KILL and join the worker thread.
    pub fn stop_thread(&self) {
        self.begin_destroy();

        let handle = self.cell.lock().thread.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("output thread for {:?} panicked", self.name);
            }
        }

        debug_assert!(self.cell.lock().command == OutputCommand::None);
    }

    // ----- misc -----

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        self.cell.lock().source.set_replay_gain_mode(mode);
    }

    pub fn lock_is_chunk_consumed(&self, seq: u64) -> bool {
        let g = self.cell.lock();
        if !g.open {
            return true;
        }
        g.source.is_chunk_consumed(seq)
    }

}

impl Drop for OutputControl {
    fn drop(&mut self) {
        // the worker holds an Arc to the controller while running, so by
        // the time Drop runs the thread has already been joined; this is
        // just a backstop for controllers that never started one
        debug_assert!(self.cell.lock().thread.is_none() || std::thread::panicking());
    }
}

/// Client-visible snapshot of one output.
#[derive(Debug, Clone, Serialize)]
pub struct OutputStatus {
    pub name: String,
    pub plugin: String,
    pub enabled: bool,
    pub open: bool,
    pub error: Option<String>,
}

impl std::fmt::Debug for OutputControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputControl")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
