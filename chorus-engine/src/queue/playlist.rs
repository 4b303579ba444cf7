//! Playlist: the play queue plus playback position tracking.
//!
//! The playlist owns the queue and knows which song is current and which
//! song has been queued to the player for gapless continuation. All
//! methods are called from the partition's thread; the player thread never
//! touches the playlist directly, it reports back through the partition's
//! listener and `sync_with_player`.

use super::song::{DetachedSong, SongLoader};
use super::{ConsumeMode, Queue, SingleMode};
use crate::error::{Error, PlayerErrorKind, Result};
use crate::player::PlayerControl;
use chorus_common::{SignedSongTime, SongTime};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Callbacks raised by the playlist towards the partition.
pub trait QueueListener: Send + Sync {
    /// The queue contents changed
    fn on_queue_modified(&self);

    /// A playback option (repeat, random, single, consume) changed
    fn on_queue_options_changed(&self);

    /// Another song became current
    fn on_queue_song_started(&self);
}

pub struct Playlist {
    pub queue: Queue,

    /// Id of the song currently being played (or paused/stopped at)
    current_id: Option<u32>,

    /// Id of the song most recently queued to the player for gapless
    /// continuation, and the instance of the clone that was handed over
    queued_id: Option<u32>,
    queued_instance: Option<Uuid>,

    /// Whether the playlist considers playback active; survives a player
    /// error while the next song is being tried
    playing: bool,

    /// Consecutive song failures; playback stops when it reaches the
    /// queue length
    error_count: usize,

    listener: Arc<dyn QueueListener>,
}

impl Playlist {
    pub fn new(listener: Arc<dyn QueueListener>) -> Self {
        Self {
            queue: Queue::new(),
            current_id: None,
            queued_id: None,
            queued_instance: None,
            playing: false,
            error_count: 0,
            listener,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Position of the current song, if any.
    pub fn current_position(&self) -> Option<usize> {
        self.current_id.and_then(|id| self.queue.position_of_id(id))
    }

    pub fn current_song(&self) -> Option<&DetachedSong> {
        self.current_id.and_then(|id| self.queue.song_by_id(id))
    }

    fn current_order_index(&self) -> Option<usize> {
        self.current_id.and_then(|id| self.queue.order_index_of_id(id))
    }

    fn on_modified(&self) {
        self.listener.on_queue_modified();
    }

    /// Recompute which song should be queued to the player and fix up the
    /// player's `next_song` if it no longer matches.
    ///
    /// A queue edit that does not displace the queued song leaves the
    /// in-flight decoder untouched.
    fn update_queued_song(&mut self, pc: &PlayerControl) {
        if !self.playing {
            return;
        }

        let desired_id = self
            .current_order_index()
            .and_then(|idx| self.queue.next_order(idx))
            .and_then(|idx| self.queue.id_at_order(idx));

        // the queued song is still the next one up: leave the in-flight
        // decoder alone
        if desired_id.is_some() && desired_id == self.queued_id && self.queued_instance.is_some() {
            return;
        }
        if desired_id.is_none() && self.queued_instance.is_none() {
            self.queued_id = None;
            return;
        }

        let desired_song = desired_id.and_then(|id| self.queue.song_by_id(id));

        if self.queued_instance.is_some() {
            pc.lock_cancel();
            self.queued_instance = None;
        }

        if let Some(song) = desired_song {
            let copy = song.reinstance();
            self.queued_instance = Some(copy.instance());
            self.queued_id = desired_id;
            pc.lock_enqueue_song(copy);
        } else {
            self.queued_id = None;
        }
    }

    fn sync_border_pause(&self, pc: &PlayerControl) {
        pc.lock_set_border_pause(
            self.queue.single != SingleMode::Off || self.queue.consume == ConsumeMode::OneShot,
        );
    }

    // ----- queue editing -----

    pub fn append_uri(
        &mut self,
        pc: &PlayerControl,
        loader: &dyn SongLoader,
        uri: &str,
    ) -> Result<u32> {
        let song = loader.load(uri)?;
        self.append_song(pc, song)
    }

    pub fn append_song(&mut self, pc: &PlayerControl, song: DetachedSong) -> Result<u32> {
        let id = self.queue.append(song);

        if self.queue.random && self.playing {
            if let Some(idx) = self.current_order_index() {
                self.queue.shuffle_order_tail(idx);
            }
        }

        self.update_queued_song(pc);
        self.on_modified();
        Ok(id)
    }

    pub fn clear(&mut self, pc: &PlayerControl) {
        if self.playing {
            self.stop(pc);
        }
        self.queue.clear();
        self.current_id = None;
        self.queued_id = None;
        self.queued_instance = None;
        self.on_modified();
    }

    pub fn delete_range(&mut self, pc: &PlayerControl, range: Range<usize>) -> Result<()> {
        if range.is_empty() {
            // explicit no-op, but still validated
            if range.start > self.queue.len() {
                return Err(Error::Argument(format!("bad song index: {}", range.start)));
            }
            return Ok(());
        }

        // before mutating, find where playback should continue if the
        // current song is part of the deleted range
        let current_deleted = self
            .current_position()
            .map(|pos| range.contains(&pos))
            .unwrap_or(false);
        let successor_id = if current_deleted {
            self.successor_outside(&range)
        } else {
            None
        };

        let removed = self.queue.delete_range(range)?;

        if let Some(queued) = self.queued_id {
            if removed.contains(&queued) {
                self.queued_id = None;
                // instance stays set so update_queued_song cancels it
            }
        }

        if current_deleted {
            self.current_id = None;
            if self.playing {
                match successor_id {
                    Some(id) => {
                        // ignore playback errors here; the partition will
                        // advance past a bad song via sync_with_player
                        if let Err(e) = self.play_id_internal(pc, id) {
                            warn!("failed to continue after delete: {e}");
                        }
                    }
                    None => self.stop(pc),
                }
            }
        }

        self.update_queued_song(pc);
        self.on_modified();
        Ok(())
    }

    /// First song after the current one (in order) that is not in `range`.
    fn successor_outside(&self, range: &Range<usize>) -> Option<u32> {
        let start = self.current_order_index()?;
        let order = self.queue.order();
        order[start + 1..].iter().copied().find(|&id| {
            self.queue
                .position_of_id(id)
                .map(|pos| !range.contains(&pos))
                .unwrap_or(false)
        })
    }

    pub fn delete_position(&mut self, pc: &PlayerControl, position: usize) -> Result<()> {
        if position >= self.queue.len() {
            return Err(Error::Argument(format!("bad song index: {position}")));
        }
        self.delete_range(pc, position..position + 1)
    }

    pub fn delete_id(&mut self, pc: &PlayerControl, id: u32) -> Result<()> {
        let position = self
            .queue
            .position_of_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?;
        self.delete_position(pc, position)
    }

    /// Remove all copies of a song that has disappeared from storage.
    pub fn stale_song(&mut self, pc: &PlayerControl, uri: &str) {
        for position in self.queue.positions_of_uri(uri) {
            if let Err(e) = self.delete_position(pc, position) {
                warn!("failed to delete stale song at {position}: {e}");
            }
        }
    }

    pub fn move_range(&mut self, pc: &PlayerControl, range: Range<usize>, to: usize) -> Result<()> {
        self.queue.move_range(range, to)?;
        // current/queued are tracked by id and survive the move; the
        // queued song is re-checked because its order successor may differ
        self.update_queued_song(pc);
        self.on_modified();
        Ok(())
    }

    pub fn swap_positions(&mut self, pc: &PlayerControl, a: usize, b: usize) -> Result<()> {
        self.queue.swap_positions(a, b)?;
        self.update_queued_song(pc);
        self.on_modified();
        Ok(())
    }

    pub fn swap_ids(&mut self, pc: &PlayerControl, id1: u32, id2: u32) -> Result<()> {
        self.queue.swap_ids(id1, id2)?;
        self.update_queued_song(pc);
        self.on_modified();
        Ok(())
    }

    pub fn shuffle(&mut self, pc: &PlayerControl, range: Range<usize>) -> Result<()> {
        self.queue.shuffle_range(range)?;
        self.update_queued_song(pc);
        self.on_modified();
        Ok(())
    }

    pub fn set_priority_range(
        &mut self,
        pc: &PlayerControl,
        range: Range<usize>,
        priority: u8,
    ) -> Result<()> {
        let after = self.current_order_index().unwrap_or(0);
        if self.queue.set_priority_range(range, priority, after)? {
            self.update_queued_song(pc);
            self.on_modified();
        }
        Ok(())
    }

    pub fn set_priority_id(&mut self, pc: &PlayerControl, id: u32, priority: u8) -> Result<()> {
        let position = self
            .queue
            .position_of_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?;
        self.set_priority_range(pc, position..position + 1, priority)
    }

    // ----- transport -----

    /// Start or resume playback without naming a song.
    pub fn play_any(&mut self, pc: &PlayerControl) -> Result<()> {
        if self.playing {
            // only unpause
            pc.lock_set_pause(false);
            return Ok(());
        }

        if self.queue.is_empty() {
            return Ok(());
        }

        let id = match self.current_id {
            Some(id) if self.queue.position_of_id(id).is_some() => id,
            _ => {
                let order_idx = if self.queue.random {
                    self.queue.random_order_index().unwrap_or(0)
                } else {
                    0
                };
                self.queue
                    .id_at_order(order_idx)
                    .ok_or_else(|| Error::Queue("empty play order".into()))?
            }
        };
        self.play_id_internal(pc, id)
    }

    pub fn play_position(&mut self, pc: &PlayerControl, position: usize) -> Result<()> {
        let id = self
            .queue
            .id_at(position)
            .ok_or_else(|| Error::Argument(format!("bad song index: {position}")))?;
        self.play_id_internal(pc, id)
    }

    pub fn play_id(&mut self, pc: &PlayerControl, id: u32) -> Result<()> {
        if self.queue.position_of_id(id).is_none() {
            return Err(Error::Argument(format!("no such song id: {id}")));
        }
        self.play_id_internal(pc, id)
    }

    fn play_id_internal(&mut self, pc: &PlayerControl, id: u32) -> Result<()> {
        let song = self
            .queue
            .song_by_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?
            .clone();

        self.playing = true;
        self.error_count = 0;
        self.current_id = Some(id);
        self.queued_id = None;
        self.queued_instance = None;
        self.sync_border_pause(pc);

        debug!("playing queue id {id}: {}", song.uri());
        let result = pc.play(song);

        self.listener.on_queue_song_started();
        self.update_queued_song(pc);
        result
    }

    pub fn play_next(&mut self, pc: &PlayerControl) -> Result<()> {
        if !self.playing {
            return Err(Error::InvalidState("not playing".into()));
        }

        // a manual "next" ignores single mode
        let single = self.queue.single;
        self.queue.single = SingleMode::Off;
        let next_id = self
            .current_order_index()
            .and_then(|idx| self.queue.next_order(idx))
            .and_then(|idx| self.queue.id_at_order(idx));
        self.queue.single = single;

        // resolve before consuming; the deletion shifts order indices
        let consumed = self.consume_current(pc);

        match next_id {
            Some(id) => self.play_id_internal(pc, id)?,
            None => self.stop(pc),
        }

        if consumed {
            self.on_modified();
        }
        Ok(())
    }

    pub fn play_previous(&mut self, pc: &PlayerControl) -> Result<()> {
        if !self.playing {
            return Err(Error::InvalidState("not playing".into()));
        }

        let current = self
            .current_order_index()
            .ok_or_else(|| Error::InvalidState("no current song".into()))?;

        let prev = if current > 0 {
            current - 1
        } else if self.queue.repeat {
            self.queue.order().len() - 1
        } else {
            // restart the current song
            current
        };

        let id = self
            .queue
            .id_at_order(prev)
            .ok_or_else(|| Error::Queue("empty play order".into()))?;
        self.play_id_internal(pc, id)
    }

    pub fn stop(&mut self, pc: &PlayerControl) {
        if !self.playing {
            return;
        }

        self.queued_id = None;
        self.queued_instance = None;
        self.playing = false;
        pc.lock_stop();
    }

    // ----- seeking -----

    pub fn seek_position(
        &mut self,
        pc: &PlayerControl,
        position: usize,
        t: SongTime,
    ) -> Result<()> {
        let id = self
            .queue
            .id_at(position)
            .ok_or_else(|| Error::Argument(format!("bad song index: {position}")))?;
        self.seek_id(pc, id, t)
    }

    pub fn seek_id(&mut self, pc: &PlayerControl, id: u32, t: SongTime) -> Result<()> {
        let song = self
            .queue
            .song_by_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?
            .clone();

        self.playing = true;
        self.error_count = 0;
        self.current_id = Some(id);
        self.queued_id = None;
        self.queued_instance = None;
        self.sync_border_pause(pc);

        let result = pc.lock_seek(song, t);

        self.listener.on_queue_song_started();
        self.update_queued_song(pc);
        result
    }

    pub fn seek_current(
        &mut self,
        pc: &PlayerControl,
        seek_time: SignedSongTime,
        relative: bool,
    ) -> Result<()> {
        let id = self
            .current_id
            .ok_or_else(|| Error::InvalidState("not playing".into()))?;

        let target = if relative {
            let elapsed = pc.lock_get_status().elapsed_time;
            seek_time.apply_to(elapsed)
        } else {
            if seek_time.is_negative() {
                return Err(Error::Argument("negative seek position".into()));
            }
            SongTime::from_millis(seek_time.as_millis() as u64)
        };

        self.seek_id(pc, id, target)
    }

    // ----- options -----

    pub fn set_repeat(&mut self, pc: &PlayerControl, value: bool) {
        if value == self.queue.repeat {
            return;
        }
        self.queue.repeat = value;
        self.update_queued_song(pc);
        self.listener.on_queue_options_changed();
    }

    pub fn get_random(&self) -> bool {
        self.queue.random
    }

    pub fn set_random(&mut self, pc: &PlayerControl, value: bool) {
        if value == self.queue.random {
            return;
        }
        self.queue.random = value;

        if value {
            self.queue.shuffle_order();
            if self.playing {
                if let Some(id) = self.current_id {
                    self.queue.move_order_to_front(id);
                }
            }
        } else {
            self.queue.restore_order();
        }

        self.update_queued_song(pc);
        self.listener.on_queue_options_changed();
    }

    pub fn set_single(&mut self, pc: &PlayerControl, value: SingleMode) {
        if value == self.queue.single {
            return;
        }
        self.queue.single = value;
        self.sync_border_pause(pc);
        self.update_queued_song(pc);
        self.listener.on_queue_options_changed();
    }

    pub fn set_consume(&mut self, pc: &PlayerControl, value: ConsumeMode) {
        if value == self.queue.consume {
            return;
        }
        self.queue.consume = value;
        self.sync_border_pause(pc);
        self.listener.on_queue_options_changed();
    }

    // ----- player feedback -----

    /// Reconcile playlist position with what the player is doing. Called
    /// (deferred) whenever the player reports a sync or state change.
    pub fn sync_with_player(&mut self, pc: &PlayerControl) {
        if !self.playing {
            return;
        }

        let info = pc.lock_sync_info();

        if info.state == chorus_common::events::PlayerState::Stop {
            self.resume_playback(pc);
            return;
        }

        // has the queued song become current?
        if let (Some(current_instance), Some(queued_instance)) =
            (info.current_instance, self.queued_instance)
        {
            if current_instance == queued_instance {
                self.queued_song_started(pc);
            }
        }
    }

    /// The player finished (or failed) its song and went to STOP while the
    /// playlist still wants to play: advance or give up.
    fn resume_playback(&mut self, pc: &PlayerControl) {
        let error = pc.lock_get_error_kind();
        if error == PlayerErrorKind::None {
            self.error_count = 0;
        } else {
            self.error_count += 1;
        }

        // resolve the successor before consuming; the deletion shifts
        // order indices
        let next = self
            .current_order_index()
            .and_then(|idx| self.queue.next_order(idx))
            .and_then(|idx| self.queue.id_at_order(idx));

        let consumed = self.consume_current(pc);

        if error == PlayerErrorKind::Output
            || self.error_count >= self.queue.len().max(1)
            || next.is_none()
        {
            self.playing = false;
            self.queued_id = None;
            self.queued_instance = None;

            // a one-shot single mode is spent once it stopped playback
            if self.queue.single == SingleMode::OneShot {
                self.queue.single = SingleMode::Off;
                self.sync_border_pause(pc);
                self.listener.on_queue_options_changed();
            }
        } else if let Some(id) = next {
            if let Err(e) = self.play_id_internal(pc, id) {
                warn!("failed to resume playback: {e}");
            }
        }

        if consumed {
            self.on_modified();
        }
    }

    /// The song queued for gapless continuation has started playing.
    fn queued_song_started(&mut self, pc: &PlayerControl) {
        let previous = self.current_id;
        self.current_id = self.queued_id;
        self.queued_id = None;
        self.queued_instance = None;
        self.error_count = 0;

        if let Some(prev) = previous {
            if self.consume_id(pc, prev) {
                self.on_modified();
            }
        }

        self.listener.on_queue_song_started();
        self.update_queued_song(pc);
    }

    /// Remove the current song if consume mode demands it.
    fn consume_current(&mut self, pc: &PlayerControl) -> bool {
        match self.current_id {
            Some(id) => self.consume_id(pc, id),
            None => false,
        }
    }

    fn consume_id(&mut self, pc: &PlayerControl, id: u32) -> bool {
        if self.queue.consume == ConsumeMode::Off {
            return false;
        }

        if self.queue.consume == ConsumeMode::OneShot {
            self.queue.consume = ConsumeMode::Off;
            self.sync_border_pause(pc);
            self.listener.on_queue_options_changed();
        }

        if let Some(position) = self.queue.position_of_id(id) {
            if self.current_id == Some(id) {
                self.current_id = None;
            }
            if self.queue.delete_range(position..position + 1).is_ok() {
                return true;
            }
        }
        false
    }

    /// Border pause was reached: a one-shot single mode resets to off.
    pub fn border_pause(&mut self, pc: &PlayerControl) {
        if self.queue.single == SingleMode::OneShot {
            self.queue.single = SingleMode::Off;
            self.sync_border_pause(pc);
            self.listener.on_queue_options_changed();
        }
    }

    /// Apply a freshly scanned tag to all queue copies of `uri`.
    pub fn tag_modified(&mut self, uri: &str, tag: &chorus_common::Tag) {
        if self.queue.tag_modified(uri, tag) {
            self.on_modified();
        }
    }
}
