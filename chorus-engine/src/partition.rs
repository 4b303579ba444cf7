//! Partition: one tenant's queue, player and output set.
//!
//! The partition wires the subsystems together and translates their
//! listener callbacks into coalesced event bits. Callbacks only OR bits
//! into mask monitors (safe from any thread, including under the player
//! mutex); the real reactions run on the embedder's main thread through
//! [`Partition::dispatch_pending`].

use crate::config::{OutputConfig, PartitionConfig};
use crate::decoder::DecoderPlugin;
use crate::error::{Error, PlayerErrorKind, Result};
use crate::mixer::{Mixer, MixerListener, MixerMemento};
use crate::output::{MultipleOutputs, OutputClient, OutputListener, OutputPlugin, OutputStatus};
use crate::player::{PlayerControl, PlayerListener, PlayerState, PlayerStatus};
use crate::idle::MaskMonitor;
use crate::queue::{ConsumeMode, Playlist, QueueListener, SingleMode, SongLoader};
use crate::stats::{DatabasePlugin, PartitionStats};
use chorus_common::events::{EngineEvent, EventBus, IdleMask};
use chorus_common::{ReplayGainMode, SignedSongTime, SongTime};
use std::ops::Range;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Deferred reaction bits (internal, not client-visible).
const TAG_MODIFIED: u32 = 0x1;
const SYNC_WITH_PLAYER: u32 = 0x2;
const BORDER_PAUSE: u32 = 0x4;

/// The listener capability set handed to the subsystems.
///
/// Owns nothing but the monitors; the partition owns the subsystems, so
/// there is no ownership cycle.
struct PartitionEvents {
    name: String,
    bus: EventBus,
    idle: MaskMonitor,
    deferred: MaskMonitor,
}

impl PartitionEvents {
    fn emit_idle(&self, mask: IdleMask) {
        self.idle.or_mask(mask.bits());
    }
}

impl PlayerListener for PartitionEvents {
    fn on_player_error(&self) {
        self.emit_idle(IdleMask::PLAYER);
        self.deferred.or_mask(SYNC_WITH_PLAYER);
    }

    fn on_player_state_changed(&self) {
        self.emit_idle(IdleMask::PLAYER);
        self.deferred.or_mask(SYNC_WITH_PLAYER);
    }

    fn on_player_sync(&self) {
        self.deferred.or_mask(SYNC_WITH_PLAYER);
    }

    fn on_player_tag_modified(&self) {
        self.deferred.or_mask(TAG_MODIFIED);
    }

    fn on_border_pause(&self) {
        self.deferred.or_mask(BORDER_PAUSE);
    }

    fn on_player_options_changed(&self) {
        self.emit_idle(IdleMask::OPTIONS);
    }
}

impl QueueListener for PartitionEvents {
    fn on_queue_modified(&self) {
        self.emit_idle(IdleMask::PLAYLIST);
    }

    fn on_queue_options_changed(&self) {
        self.emit_idle(IdleMask::OPTIONS);
    }

    fn on_queue_song_started(&self) {
        self.emit_idle(IdleMask::PLAYER);
    }
}

impl MixerListener for PartitionEvents {
    fn on_mixer_volume_changed(&self, volume: u32) {
        self.emit_idle(IdleMask::MIXER);
        self.bus.emit(EngineEvent::VolumeChanged {
            partition: self.name.clone(),
            volume: volume as i32,
            timestamp: chrono::Utc::now(),
        });
    }

    fn on_mixer_changed(&self) {
        self.emit_idle(IdleMask::MIXER);
    }
}

impl OutputListener for PartitionEvents {
    fn on_output_error(&self) {
        self.emit_idle(IdleMask::OUTPUT);
    }
}

/// Client-visible combined status.
#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub player: PlayerStatus,
    pub current_position: Option<usize>,
    pub current_id: Option<u32>,
    pub queue_length: usize,
    pub queue_version: u64,
    pub repeat: bool,
    pub random: bool,
    pub single: SingleMode,
    pub consume: ConsumeMode,
    pub replay_gain_mode: ReplayGainMode,
    pub volume: Option<u32>,
}

/// A partition of the music server: a separate unit with a playlist, a
/// player and outputs.
pub struct Partition {
    pub name: String,

    events: Arc<PartitionEvents>,

    playlist: Mutex<Playlist>,
    pub outputs: Arc<MultipleOutputs>,
    pub pc: Arc<PlayerControl>,
    mixer_memento: Mutex<MixerMemento>,

    /// Authoritative client-set value; AUTO is resolved before being
    /// pushed to the outputs
    replay_gain_mode: Mutex<ReplayGainMode>,

    started_at: Instant,
}

impl Partition {
    pub fn new(
        name: impl Into<String>,
        config: PartitionConfig,
        outputs: Vec<(
            OutputConfig,
            Option<Box<dyn OutputPlugin>>,
            Option<Arc<Mixer>>,
        )>,
        decoder: Arc<dyn DecoderPlugin>,
        bus: EventBus,
    ) -> Arc<Self> {
        let name = name.into();

        let events = Arc::new(PartitionEvents {
            name: name.clone(),
            bus,
            idle: MaskMonitor::new(),
            deferred: MaskMonitor::new(),
        });

        let outputs = MultipleOutputs::new(&config.player, outputs);

        let listener: Arc<dyn PlayerListener> = Arc::clone(&events) as Arc<dyn PlayerListener>;
        let pc = PlayerControl::new(listener, Arc::clone(&outputs), decoder, &config);

        let client: Weak<dyn OutputClient> = Arc::downgrade(&pc) as Weak<dyn OutputClient>;
        outputs.set_client(client);

        let output_listener: Weak<dyn OutputListener> =
            Arc::downgrade(&events) as Weak<dyn OutputListener>;
        outputs.set_listener(output_listener);

        let queue_listener: Arc<dyn QueueListener> = Arc::clone(&events) as Arc<dyn QueueListener>;
        let playlist = Mutex::new(Playlist::new(queue_listener));

        info!("partition {name:?} created");

        Arc::new(Self {
            name,
            events,
            playlist,
            outputs,
            pc,
            mixer_memento: Mutex::new(MixerMemento::new()),
            replay_gain_mode: Mutex::new(ReplayGainMode::Off),
            started_at: Instant::now(),
        })
    }

    // ----- event plumbing -----

    /// Emit idle bits to this partition's clients. Safe from any thread.
    pub fn emit_idle(&self, mask: IdleMask) {
        self.events.emit_idle(mask);
    }

    /// Whether deferred reactions or idle bits are waiting for dispatch.
    pub fn has_pending_events(&self) -> bool {
        self.events.deferred.is_pending() || self.events.idle.is_pending()
    }

    /// Wait until there is something to dispatch.
    pub async fn wait_pending(&self) {
        tokio::select! {
            _ = self.events.deferred.wait() => {}
            _ = self.events.idle.wait() => {}
        }
    }

    /// Run deferred reactions and deliver coalesced idle bits.
    ///
    /// Must be called from the partition's main thread.
    pub fn dispatch_pending(&self) {
        loop {
            let deferred = self.events.deferred.take();
            if deferred == 0 {
                break;
            }

            if deferred & TAG_MODIFIED != 0 {
                self.tag_modified();
            }
            if deferred & SYNC_WITH_PLAYER != 0 {
                self.sync_with_player();
            }
            if deferred & BORDER_PAUSE != 0 {
                self.border_pause();
            }
        }

        let idle = IdleMask::from_bits(self.events.idle.take());
        if !idle.is_empty() {
            debug!("partition {:?}: idle {idle}", self.name);
            self.events.bus.emit(EngineEvent::Idle {
                partition: self.name.clone(),
                mask: idle,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Synchronize the play queue with what the player is doing.
    pub fn sync_with_player(&self) {
        self.playlist.lock().unwrap().sync_with_player(&self.pc);
    }

    /// A tag in the play queue has been modified by the player thread.
    pub fn tag_modified(&self) {
        if let Some(song) = self.pc.lock_read_tagged_song() {
            let mut playlist = self.playlist.lock().unwrap();
            playlist.tag_modified(song.uri(), song.tag());
        }
    }

    /// Border pause has just been hit: a one-shot single mode resets.
    pub fn border_pause(&self) {
        self.playlist.lock().unwrap().border_pause(&self.pc);
    }

    // ----- transport -----

    pub fn play_any(&self) -> Result<()> {
        self.playlist.lock().unwrap().play_any(&self.pc)
    }

    pub fn play_position(&self, position: usize) -> Result<()> {
        self.playlist.lock().unwrap().play_position(&self.pc, position)
    }

    pub fn play_id(&self, id: u32) -> Result<()> {
        self.playlist.lock().unwrap().play_id(&self.pc, id)
    }

    pub fn play_next(&self) -> Result<()> {
        self.playlist.lock().unwrap().play_next(&self.pc)
    }

    pub fn play_previous(&self) -> Result<()> {
        self.playlist.lock().unwrap().play_previous(&self.pc)
    }

    pub fn stop(&self) {
        self.playlist.lock().unwrap().stop(&self.pc)
    }

    pub fn set_pause(&self, pause: bool) {
        self.pc.lock_set_pause(pause);
    }

    pub fn seek_position(&self, position: usize, t: SongTime) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .seek_position(&self.pc, position, t)
    }

    pub fn seek_id(&self, id: u32, t: SongTime) -> Result<()> {
        self.playlist.lock().unwrap().seek_id(&self.pc, id, t)
    }

    pub fn seek_current(&self, t: SignedSongTime, relative: bool) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .seek_current(&self.pc, t, relative)
    }

    // ----- queue editing -----

    pub fn append_uri(&self, loader: &dyn SongLoader, uri: &str) -> Result<u32> {
        self.playlist
            .lock()
            .unwrap()
            .append_uri(&self.pc, loader, uri)
    }

    pub fn clear_queue(&self) {
        self.playlist.lock().unwrap().clear(&self.pc)
    }

    pub fn delete_position(&self, position: usize) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .delete_position(&self.pc, position)
    }

    pub fn delete_id(&self, id: u32) -> Result<()> {
        self.playlist.lock().unwrap().delete_id(&self.pc, id)
    }

    pub fn delete_range(&self, range: Range<usize>) -> Result<()> {
        self.playlist.lock().unwrap().delete_range(&self.pc, range)
    }

    /// A song file disappeared from storage; purge it from the queue.
    pub fn stale_song(&self, uri: &str) {
        self.playlist.lock().unwrap().stale_song(&self.pc, uri)
    }

    pub fn shuffle(&self, range: Range<usize>) -> Result<()> {
        self.playlist.lock().unwrap().shuffle(&self.pc, range)
    }

    pub fn move_range(&self, range: Range<usize>, to: usize) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .move_range(&self.pc, range, to)
    }

    pub fn swap_positions(&self, a: usize, b: usize) -> Result<()> {
        self.playlist.lock().unwrap().swap_positions(&self.pc, a, b)
    }

    pub fn swap_ids(&self, id1: u32, id2: u32) -> Result<()> {
        self.playlist.lock().unwrap().swap_ids(&self.pc, id1, id2)
    }

    pub fn set_priority_range(&self, range: Range<usize>, priority: u8) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .set_priority_range(&self.pc, range, priority)
    }

    pub fn set_priority_id(&self, id: u32, priority: u8) -> Result<()> {
        self.playlist
            .lock()
            .unwrap()
            .set_priority_id(&self.pc, id, priority)
    }

    // ----- options -----

    pub fn set_repeat(&self, value: bool) {
        self.playlist.lock().unwrap().set_repeat(&self.pc, value)
    }

    pub fn get_random(&self) -> bool {
        self.playlist.lock().unwrap().get_random()
    }

    pub fn set_random(&self, value: bool) {
        self.playlist.lock().unwrap().set_random(&self.pc, value);
        // the effective replay-gain mode depends on the playback order
        self.update_effective_replay_gain_mode();
    }

    pub fn set_single(&self, value: SingleMode) {
        self.playlist.lock().unwrap().set_single(&self.pc, value)
    }

    pub fn set_consume(&self, value: ConsumeMode) {
        self.playlist.lock().unwrap().set_consume(&self.pc, value)
    }

    pub fn replay_gain_mode(&self) -> ReplayGainMode {
        *self.replay_gain_mode.lock().unwrap()
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        *self.replay_gain_mode.lock().unwrap() = mode;
        self.update_effective_replay_gain_mode();
        self.emit_idle(IdleMask::OPTIONS);
    }

    /// Publish the effective replay-gain mode to all outputs, resolving
    /// AUTO against the current playback order.
    pub fn update_effective_replay_gain_mode(&self) {
        let mode = self.replay_gain_mode();
        let resolved = mode.resolve_auto(self.get_random());
        debug!(
            "partition {:?}: effective replay gain mode {resolved:?}",
            self.name
        );
        self.outputs.set_replay_gain_mode(resolved);
        self.events.bus.emit(EngineEvent::ReplayGainModeChanged {
            partition: self.name.clone(),
            mode: resolved,
            timestamp: chrono::Utc::now(),
        });
    }

    // ----- crossfade options -----

    pub fn set_cross_fade(&self, duration: SongTime) {
        self.pc.set_cross_fade(duration);
    }

    pub fn set_mixramp_db(&self, db: f32) {
        self.pc.set_mixramp_db(db);
    }

    pub fn set_mixramp_delay(&self, delay: SongTime) {
        self.pc.set_mixramp_delay(delay);
    }

    // ----- outputs & mixers -----

    pub fn output_statuses(&self) -> Vec<OutputStatus> {
        self.outputs.statuses()
    }

    /// Enable or disable an output by index; returns whether it changed.
    pub fn enable_output(&self, index: usize, enabled: bool) -> Result<bool> {
        let control = self
            .outputs
            .get(index)
            .ok_or_else(|| Error::Argument(format!("no such output: {index}")))?;

        if !control.lock_set_enabled(enabled) {
            return Ok(false);
        }

        self.emit_idle(IdleMask::OUTPUT);
        self.pc.lock_update_audio();
        Ok(true)
    }

    pub fn toggle_output(&self, index: usize) -> Result<bool> {
        let control = self
            .outputs
            .get(index)
            .ok_or_else(|| Error::Argument(format!("no such output: {index}")))?;

        let enabled = control.lock_toggle_enabled();
        self.emit_idle(IdleMask::OUTPUT);
        self.pc.lock_update_audio();
        Ok(enabled)
    }

    pub fn get_volume(&self) -> Option<u32> {
        self.mixer_memento.lock().unwrap().get_volume(&self.outputs)
    }

    pub fn set_volume(&self, volume: u32) -> Result<()> {
        self.mixer_memento
            .lock()
            .unwrap()
            .set_volume(&self.outputs, volume)?;
        self.events.on_mixer_volume_changed(volume);
        Ok(())
    }

    // ----- status & errors -----

    pub fn status(&self) -> PartitionStatus {
        let volume = self.get_volume();
        let player = self.pc.lock_get_status();
        let playlist = self.playlist.lock().unwrap();
        let current_position = playlist.current_position();
        let current_id = current_position.and_then(|p| playlist.queue.id_at(p));

        PartitionStatus {
            player,
            current_position,
            current_id,
            queue_length: playlist.queue.len(),
            queue_version: playlist.queue.version(),
            repeat: playlist.queue.repeat,
            random: playlist.queue.random,
            single: playlist.queue.single,
            consume: playlist.queue.consume,
            replay_gain_mode: self.replay_gain_mode(),
            volume,
        }
    }

    pub fn get_error(&self) -> Option<(PlayerErrorKind, Error)> {
        self.pc.lock_get_error()
    }

    pub fn clear_error(&self) {
        self.pc.lock_clear_error();
    }

    pub fn player_state(&self) -> PlayerState {
        self.pc.lock_get_status().state
    }

    pub fn stats(&self, database: Option<&dyn DatabasePlugin>) -> PartitionStats {
        let (database_stats, stamp) = match database {
            Some(db) => {
                let stats = match db.stats() {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        warn!("failed to read database stats: {e}");
                        None
                    }
                };
                (stats, db.update_stamp())
            }
            None => (None, None),
        };

        PartitionStats {
            uptime: self.started_at.elapsed(),
            database: database_stats,
            database_update_stamp: stamp,
        }
    }

    // ----- lifecycle -----

    /// Tear down in reverse order: stop the player, then the outputs.
    pub fn begin_shutdown(&self) {
        info!("partition {:?} shutting down", self.name);
        self.playlist.lock().unwrap().stop(&self.pc);
        self.pc.kill();
        self.outputs.close();
        self.outputs.stop_all();
        self.dispatch_pending();
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
