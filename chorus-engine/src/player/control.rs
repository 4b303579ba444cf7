//! Player control: the synchronous command interface between clients and
//! the player thread.
//!
//! Same mailbox shape as the output controllers: a single command slot
//! under the mutex, `wake_cond` for the worker, `client_cond` for
//! clients. Clients observe `command == None` as "engine idle with
//! respect to me": when a synchronous command returns, all its side
//! effects are published under the mutex.

use crate::config::{CrossFadeConfig, PartitionConfig, PlayerConfig};
use crate::decoder::DecoderPlugin;
use crate::error::{Error, PlayerErrorKind, Result};
use crate::output::{MultipleOutputs, OutputClient};
use crate::player::{PlayerListener, PlayerState};
use crate::queue::DetachedSong;
use crate::sync::{WorkerCell, Wakeup};
use chorus_common::{AudioFormat, SongTime};
use std::sync::{Arc, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Commands accepted by the player thread. The slot is single-valued;
/// `None` means free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum PlayerCommand {
    #[default]
    None,
    Exit,
    Stop,
    Pause,
    Seek,
    CloseAudio,
    UpdateAudio,
    Queue,
    Cancel,
    Refresh,
}

/// Client-visible player status snapshot.
#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub bit_rate: u32,
    pub audio_format: Option<AudioFormat>,
    pub total_time: Option<SongTime>,
    pub elapsed_time: SongTime,
}

/// Snapshot used by the playlist to reconcile its position with the
/// player.
#[derive(Debug, Clone)]
pub struct SyncInfo {
    pub state: PlayerState,
    /// Instance id of the song the player is currently playing
    pub current_instance: Option<Uuid>,
    pub error: PlayerErrorKind,
}

pub(super) struct PlayerInner {
    pub(super) command: PlayerCommand,
    pub(super) state: PlayerState,

    pub(super) error: Option<(PlayerErrorKind, Error)>,

    /// Song handed over for QUEUE or SEEK; `Some` means a QUEUE/SEEK is
    /// in flight or completed but not yet picked up
    pub(super) next_song: Option<DetachedSong>,
    pub(super) seek_time: SongTime,
    /// True from SEEK issue until the decoder reached the target (or
    /// failed)
    pub(super) seeking: bool,

    /// True while the player thread runs client-observable work
    pub(super) occupied: bool,

    /// Pause at the next song border (single / one-shot consume)
    pub(super) border_pause: bool,

    pub(super) bit_rate: u32,
    pub(super) audio_format: Option<AudioFormat>,
    pub(super) total_time: Option<SongTime>,
    pub(super) elapsed_time: SongTime,

    /// Instance id of the song currently being played
    pub(super) current_instance: Option<Uuid>,

    /// Song whose tag the decoder modified, awaiting partition pickup
    pub(super) tagged_song: Option<DetachedSong>,

    pub(super) cross_fade: CrossFadeConfig,

    pub(super) thread: Option<JoinHandle<()>>,
}

/// Synchronous command/event interface to the player thread.
pub struct PlayerControl {
    pub(super) cell: WorkerCell<PlayerInner>,
    pub(super) config: PlayerConfig,
    pub(super) outputs: Arc<MultipleOutputs>,
    pub(super) listener: Arc<dyn PlayerListener>,
    pub(super) decoder: Arc<dyn DecoderPlugin>,
    /// Back-reference handed to the player thread at startup
    self_ref: OnceLock<Weak<PlayerControl>>,
}

impl PlayerControl {
    pub fn new(
        listener: Arc<dyn PlayerListener>,
        outputs: Arc<MultipleOutputs>,
        decoder: Arc<dyn DecoderPlugin>,
        config: &PartitionConfig,
    ) -> Arc<Self> {
        let control = Arc::new(Self {
            cell: WorkerCell::new(PlayerInner {
                command: PlayerCommand::None,
                state: PlayerState::Stop,
                error: None,
                next_song: None,
                seek_time: SongTime::ZERO,
                seeking: false,
                occupied: false,
                border_pause: false,
                bit_rate: 0,
                audio_format: None,
                total_time: None,
                elapsed_time: SongTime::ZERO,
                current_instance: None,
                tagged_song: None,
                cross_fade: config.cross_fade,
                thread: None,
            }),
            config: config.player.clone(),
            outputs,
            listener,
            decoder,
            self_ref: OnceLock::new(),
        });
        let _ = control.self_ref.set(Arc::downgrade(&control));
        control
    }

    // ----- mailbox -----

    fn synchronous_command<'a>(
        &'a self,
        mut g: MutexGuard<'a, PlayerInner>,
        cmd: PlayerCommand,
    ) -> MutexGuard<'a, PlayerInner> {
        // wait out a command another client may have in flight
        while g.command != PlayerCommand::None {
            g = self.cell.wait_client(g);
        }
        g.command = cmd;
        self.cell.notify_worker();
        while g.command != PlayerCommand::None {
            g = self.cell.wait_client(g);
        }
        g
    }

    fn lock_synchronous_command(&self, cmd: PlayerCommand) {
        let g = self.cell.lock();
        let _g = self.synchronous_command(g, cmd);
    }

    /// Player-thread side: wait once for the outputs to consume below
    /// `threshold` chunks. Returns whether the threshold is now met; a
    /// command arriving also ends the wait.
    pub(super) fn wait_output_consumed<'a>(
        &'a self,
        mut g: MutexGuard<'a, PlayerInner>,
        threshold: usize,
    ) -> (MutexGuard<'a, PlayerInner>, bool) {
        let mut result = self.outputs.check_pipe() < threshold;
        if !result && g.command == PlayerCommand::None {
            g = self.cell.wait_worker(g);
            result = self.outputs.check_pipe() < threshold;
        }
        (g, result)
    }

    fn thread_defined(&self) -> bool {
        self.cell.lock().thread.is_some()
    }

    fn start_thread_if_needed(&self) {
        let mut g = self.cell.lock();
        if g.thread.is_some() {
            return;
        }

        let ctrl = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .expect("player control dropped");
        let handle = std::thread::Builder::new()
            .name("player".to_string())
            .spawn(move || super::thread::run(ctrl))
            .expect("failed to spawn player thread");
        g.thread = Some(handle);
        debug!("player thread started");
    }

    // ----- transport -----

    /// Start playing `song` from its beginning, unpausing if necessary.
    pub fn play(&self, song: DetachedSong) -> Result<()> {
        self.start_thread_if_needed();

        let g = self.cell.lock();
        let g = self.seek_locked(g, song, SongTime::ZERO)?;

        if g.state == PlayerState::Pause {
            // if the player was paused previously, we need to unpause it
            let _g = self.synchronous_command(g, PlayerCommand::Pause);
            self.listener.on_player_state_changed();
        }

        Ok(())
    }

    /// Discard the player's queued next song, if any.
    pub fn lock_cancel(&self) {
        if !self.thread_defined() {
            return;
        }

        self.lock_synchronous_command(PlayerCommand::Cancel);
        debug_assert!(self.cell.lock().next_song.is_none());
    }

    /// Stop playback and release the outputs (`always_on` devices pause
    /// instead of closing).
    pub fn lock_stop(&self) {
        if !self.thread_defined() {
            return;
        }

        self.lock_synchronous_command(PlayerCommand::Stop);
        debug_assert!(self.cell.lock().next_song.is_none());

        self.listener.on_player_state_changed();
    }

    /// Stop playback and close the outputs synchronously.
    pub fn lock_close_audio(&self) {
        if !self.thread_defined() {
            return;
        }

        self.lock_synchronous_command(PlayerCommand::CloseAudio);
        self.listener.on_player_state_changed();
    }

    /// Re-evaluate enabled outputs and reopen as needed.
    pub fn lock_update_audio(&self) {
        if !self.thread_defined() {
            return;
        }

        self.lock_synchronous_command(PlayerCommand::UpdateAudio);
    }

    /// Shut the player thread down and join it.
    pub fn kill(&self) {
        if !self.thread_defined() {
            return;
        }

        self.lock_synchronous_command(PlayerCommand::Exit);

        let handle = self.cell.lock().thread.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.listener.on_player_state_changed();
    }

    fn pause_locked<'a>(&'a self, g: MutexGuard<'a, PlayerInner>) -> MutexGuard<'a, PlayerInner> {
        if g.state == PlayerState::Stop {
            return g;
        }

        let g = self.synchronous_command(g, PlayerCommand::Pause);
        self.listener.on_player_state_changed();
        g
    }

    /// Toggle pause.
    pub fn lock_pause(&self) {
        if !self.thread_defined() {
            return;
        }
        let g = self.cell.lock();
        let _g = self.pause_locked(g);
    }

    /// Enter or leave pause explicitly; a no-op when already there.
    pub fn lock_set_pause(&self, pause: bool) {
        if !self.thread_defined() {
            return;
        }

        let g = self.cell.lock();
        match g.state {
            PlayerState::Stop => {}
            PlayerState::Play => {
                if pause {
                    let _g = self.pause_locked(g);
                }
            }
            PlayerState::Pause => {
                if !pause {
                    let _g = self.pause_locked(g);
                }
            }
        }
    }

    pub fn lock_set_border_pause(&self, border_pause: bool) {
        self.cell.lock().border_pause = border_pause;
    }

    // ----- song handoff -----

    /// Queue `song` for seamless continuation after the current song.
    pub fn lock_enqueue_song(&self, song: DetachedSong) {
        debug_assert!(self.thread_defined());

        let mut g = self.cell.lock();
        debug_assert!(g.next_song.is_none());
        g.next_song = Some(song);
        g.seek_time = SongTime::ZERO;
        let _g = self.synchronous_command(g, PlayerCommand::Queue);
    }

    fn seek_locked<'a>(
        &'a self,
        mut g: MutexGuard<'a, PlayerInner>,
        song: DetachedSong,
        t: SongTime,
    ) -> Result<MutexGuard<'a, PlayerInner>> {
        // to issue the SEEK command below, we need to clear the
        // "next_song" attribute with the CANCEL command
        if g.next_song.is_some() {
            g = self.synchronous_command(g, PlayerCommand::Cancel);
        }
        debug_assert!(g.next_song.is_none());

        g.error = None;
        g.next_song = Some(song);
        g.seek_time = t;
        g = self.synchronous_command(g, PlayerCommand::Seek);
        debug_assert!(g.next_song.is_none());

        // the SEEK command is asynchronous; until completion, the
        // "seeking" flag is set
        while g.seeking {
            g = self.cell.wait_client(g);
        }

        if let Some((_, error)) = &g.error {
            let error = error.clone();
            g.error = None;
            return Err(error);
        }

        Ok(g)
    }

    /// Seek within `song` (which may or may not be the current song).
    ///
    /// Blocks until the decoder reached the target position; a decoder
    /// failure is returned to the caller.
    pub fn lock_seek(&self, song: DetachedSong, t: SongTime) -> Result<()> {
        self.start_thread_if_needed();

        let g = self.cell.lock();
        self.seek_locked(g, song, t).map(|_| ())
    }

    // ----- status & errors -----

    pub fn lock_get_status(&self) -> PlayerStatus {
        let mut g = self.cell.lock();

        if !g.occupied && g.thread.is_some() {
            g = self.synchronous_command(g, PlayerCommand::Refresh);
        }

        PlayerStatus {
            state: g.state,
            bit_rate: g.bit_rate,
            audio_format: g.audio_format,
            total_time: g.total_time,
            elapsed_time: g.elapsed_time,
        }
    }

    pub fn lock_sync_info(&self) -> SyncInfo {
        let g = self.cell.lock();
        SyncInfo {
            state: g.state,
            current_instance: g.current_instance,
            error: g.error.as_ref().map(|(kind, _)| *kind).unwrap_or_default(),
        }
    }

    pub fn lock_get_error(&self) -> Option<(PlayerErrorKind, Error)> {
        self.cell.lock().error.clone()
    }

    pub fn lock_get_error_kind(&self) -> PlayerErrorKind {
        self.cell
            .lock()
            .error
            .as_ref()
            .map(|(kind, _)| *kind)
            .unwrap_or_default()
    }

    pub fn lock_clear_error(&self) {
        self.cell.lock().error = None;
    }

    /// Take the song whose tag the decoder modified.
    pub fn lock_read_tagged_song(&self) -> Option<DetachedSong> {
        self.cell.lock().tagged_song.take()
    }

    // ----- crossfade options -----

    pub fn set_cross_fade(&self, duration: SongTime) {
        self.cell.lock().cross_fade.duration = duration;
        self.listener.on_player_options_changed();
    }

    pub fn cross_fade(&self) -> SongTime {
        self.cell.lock().cross_fade.duration
    }

    pub fn set_mixramp_db(&self, db: f32) {
        self.cell.lock().cross_fade.mixramp_db = db;
        self.listener.on_player_options_changed();
    }

    pub fn mixramp_db(&self) -> f32 {
        self.cell.lock().cross_fade.mixramp_db
    }

    pub fn set_mixramp_delay(&self, delay: SongTime) {
        self.cell.lock().cross_fade.mixramp_delay = delay;
        self.listener.on_player_options_changed();
    }

    pub fn mixramp_delay(&self) -> SongTime {
        self.cell.lock().cross_fade.mixramp_delay
    }
}

/// The output workers poke the player through this seam.
impl OutputClient for PlayerControl {
    fn chunks_consumed(&self) {
        // the producer may be waiting for pipe space; taking the mutex
        // before notifying closes the window between its predicate check
        // and its wait
        let _g = self.cell.lock();
        self.cell.notify_worker();
    }

    fn apply_enabled(&self) {
        self.lock_update_audio();
    }
}

/// The decoder source pokes the player through this seam.
impl Wakeup for PlayerControl {
    fn wake(&self) {
        let _g = self.cell.lock();
        self.cell.notify_worker();
    }
}

impl std::fmt::Debug for PlayerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerControl").finish_non_exhaustive()
    }
}
