//! The player thread.
//!
//! Runs the per-song state machine: takes queued songs, pulls decoded
//! blocks from the decoder source, stages crossfade overlaps, and submits
//! chunks to the outputs. All blocking work happens with the control
//! mutex released; the pending command is re-checked after every
//! reacquisition.

use super::control::{PlayerCommand, PlayerControl, PlayerInner};
use super::{crossfade, PlayerState};
use crate::chunk::MusicChunk;
use crate::config::CHUNK_FRAMES;
use crate::decoder::{BlockPoll, DecodedBlock, DecoderSource};
use crate::error::{Error, PlayerErrorKind};
use crate::queue::DetachedSong;
use crate::sync::Wakeup;
use chorus_common::AudioFormat;
use std::collections::VecDeque;
use std::sync::{Arc, MutexGuard};
use tracing::{debug, error, warn};

type Guard<'a> = MutexGuard<'a, PlayerInner>;

/// Player-thread-private state.
struct Player {
    /// Decoder of the current song
    source: Option<DecoderSource>,
    song: Option<DetachedSong>,

    /// Decoder of the next song, opened when the current one finishes
    next_source: Option<DecoderSource>,
    next_staged: Option<DetachedSong>,

    /// A QUEUE command announced a next song in the control slot
    queued: bool,

    /// Chunks decoded but not yet submitted; holds back the crossfade
    /// overlap while a next song is pending
    pending: VecDeque<MusicChunk>,

    /// Size of the tail when crossfade mixing started; 0 while inactive
    xfade_total: usize,

    /// Outputs are open at `play_format`
    output_open: bool,
    play_format: Option<AudioFormat>,

    /// Bumped per song so output replay-gain filters recompute
    rg_serial: u64,
    first_block: bool,
}

pub(super) fn run(ctrl: Arc<PlayerControl>) {
    debug!("player thread running");

    let mut player = Player {
        source: None,
        song: None,
        next_source: None,
        next_staged: None,
        queued: false,
        pending: VecDeque::new(),
        xfade_total: 0,
        output_open: false,
        play_format: None,
        rg_serial: 0,
        first_block: true,
    };

    let mut g = ctrl.cell.lock();
    loop {
        if g.command != PlayerCommand::None {
            let (g2, exit) = process_command(&ctrl, &mut player, g);
            g = g2;
            if exit {
                debug!("player thread exiting");
                return;
            }
            continue;
        }

        if g.state == PlayerState::Play {
            g.occupied = true;
            let (g2, worked) = iterate(&ctrl, &mut player, g);
            g = g2;
            if worked {
                continue;
            }
        }

        g.occupied = false;
        g = ctrl.cell.wait_worker(g);
    }
}

fn command_finished(ctrl: &PlayerControl, g: &mut Guard<'_>) {
    debug_assert!(g.command != PlayerCommand::None);
    g.command = PlayerCommand::None;
    ctrl.cell.notify_clients();
}

fn set_error(ctrl: &PlayerControl, g: &mut Guard<'_>, kind: PlayerErrorKind, e: Error) {
    debug_assert!(kind != PlayerErrorKind::None);
    g.error = Some((kind, e));
    ctrl.listener.on_player_error();
}

fn process_command<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
) -> (Guard<'a>, bool) {
    match g.command {
        PlayerCommand::None => unreachable!(),

        PlayerCommand::Queue => {
            debug_assert!(g.next_song.is_some());
            player.queued = true;
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::Cancel => {
            g.next_song = None;
            player.queued = false;
            // abort any crossfade staging for the cancelled song
            let stale_source = player.next_source.take();
            player.next_staged = None;
            player.xfade_total = 0;
            if stale_source.is_some() {
                let (g2, _) = ctrl.cell.unlocked(g, || drop(stale_source));
                g = g2;
            }
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::Seek => {
            g = do_seek(ctrl, player, g);
        }

        PlayerCommand::Pause => {
            g = do_pause(ctrl, player, g);
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::Stop => {
            g = stop_playback(ctrl, player, g, false);
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::CloseAudio => {
            g = stop_playback(ctrl, player, g, true);
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::UpdateAudio => {
            let outputs = Arc::clone(&ctrl.outputs);
            let (g2, _) = ctrl.cell.unlocked(g, || {
                outputs.enable_disable();
                outputs.update(true);
            });
            g = g2;
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::Refresh => {
            // status fields are maintained continuously; nothing to pull
            command_finished(ctrl, &mut g);
        }

        PlayerCommand::Exit => {
            g = stop_playback(ctrl, player, g, true);
            command_finished(ctrl, &mut g);
            return (g, true);
        }
    }

    (g, false)
}

/// Stop everything. With `close` the outputs are closed synchronously;
/// otherwise they are released (which pauses `always_on` devices instead
/// of closing them).
fn stop_playback<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
    close: bool,
) -> Guard<'a> {
    let old_source = player.source.take();
    let old_next = player.next_source.take();
    player.song = None;
    player.next_staged = None;
    player.pending.clear();
    player.queued = false;
    player.xfade_total = 0;
    player.output_open = false;

    g.next_song = None;
    g.current_instance = None;
    g.seeking = false;
    let was_playing = g.state != PlayerState::Stop;
    g.state = PlayerState::Stop;

    let outputs = Arc::clone(&ctrl.outputs);
    let (g, _) = ctrl.cell.unlocked(g, || {
        // join the decoder threads first so no more chunks appear
        drop(old_source);
        drop(old_next);
        outputs.cancel();
        if close {
            outputs.close();
        } else {
            outputs.release();
        }
    });

    if was_playing {
        ctrl.listener.on_player_state_changed();
    }
    g
}

fn do_pause<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
) -> Guard<'a> {
    match g.state {
        PlayerState::Stop => g,

        PlayerState::Play => {
            g.state = PlayerState::Pause;
            let outputs = Arc::clone(&ctrl.outputs);
            let (g, _) = ctrl.cell.unlocked(g, || outputs.pause());
            g
        }

        PlayerState::Pause => {
            // resume: reopen outputs that closed for the pause; paused
            // devices leave their pause loop when the OPEN arrives
            let outputs = Arc::clone(&ctrl.outputs);
            let (mut g, any_open) = ctrl.cell.unlocked(g, || outputs.update(true));

            if player.source.is_some() || !player.pending.is_empty() {
                if any_open {
                    g.state = PlayerState::Play;
                } else {
                    let e = Error::Output {
                        name: "all".into(),
                        message: "no audio output could be reopened".into(),
                    };
                    error!("cannot resume: {e}");
                    set_error(ctrl, &mut g, PlayerErrorKind::Output, e);
                }
            } else {
                g.state = PlayerState::Stop;
            }
            g
        }
    }
}

fn do_seek<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
) -> Guard<'a> {
    let song = g.next_song.take().expect("SEEK without a song");
    let t = g.seek_time;

    g.seeking = true;
    command_finished(ctrl, &mut g);

    player.queued = false;
    player.next_staged = None;
    player.pending.clear();
    player.xfade_total = 0;
    let old_source = player.source.take();
    let old_next = player.next_source.take();

    let outputs = Arc::clone(&ctrl.outputs);
    let decoder = Arc::clone(&ctrl.decoder);
    let wake: Arc<dyn Wakeup> = Arc::clone(ctrl) as Arc<dyn Wakeup>;

    let (mut g, result) = ctrl.cell.unlocked(g, || {
        drop(old_source);
        drop(old_next);
        // discard audio decoded for the old position
        outputs.cancel();
        DecoderSource::open(decoder.as_ref(), &song, t, wake)
    });

    let mut state_changed = false;
    match result {
        Ok(source) => {
            g.audio_format = Some(source.format());
            g.total_time = source.duration();
            g.elapsed_time = t;
            g.bit_rate = 0;
            g.current_instance = Some(song.instance());

            player.rg_serial += 1;
            player.first_block = true;
            player.song = Some(song);
            player.source = Some(source);
            // force a format re-check before the first chunk
            player.output_open = false;

            if g.state == PlayerState::Stop {
                g.state = PlayerState::Play;
                state_changed = true;
            }
            // a seek while paused stays paused
        }
        Err(e) => {
            warn!("failed to open {:?}: {e}", song.uri());
            set_error(ctrl, &mut g, PlayerErrorKind::Decoder, e);
            player.song = None;
            g.current_instance = None;
            if g.state != PlayerState::Stop {
                g.state = PlayerState::Stop;
                state_changed = true;
            }
        }
    }

    g.seeking = false;
    ctrl.cell.notify_clients();

    if state_changed {
        ctrl.listener.on_player_state_changed();
    }
    if g.error.is_some() {
        // let the queue layer advance past the failed song
        ctrl.listener.on_player_sync();
    }
    g
}

/// One round of PLAY-state work; returns whether progress was made.
fn iterate<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
) -> (Guard<'a>, bool) {
    // 1. make sure the outputs are open for the current format
    if !player.output_open {
        let format = match (&player.source, player.pending.front()) {
            (Some(source), _) => source.format(),
            (None, Some(chunk)) => chunk.format,
            (None, None) => return song_end(ctrl, player, g),
        };

        let outputs = Arc::clone(&ctrl.outputs);
        let (g2, result) = ctrl.cell.unlocked(g, || outputs.open(format));
        g = g2;

        match result {
            Ok(()) => {
                player.output_open = true;
                player.play_format = Some(format);
                g.audio_format = Some(format);
            }
            Err(e) => {
                error!("failed to open audio outputs: {e}");
                set_error(ctrl, &mut g, PlayerErrorKind::Output, e);
                let g = stop_playback(ctrl, player, g, false);
                ctrl.listener.on_player_sync();
                return (g, false);
            }
        }

        return (g, true);
    }

    // 2. backpressure: wait once for output consumption or a command
    if ctrl.outputs.check_pipe() >= ctrl.config.buffer_chunks {
        let (g, _) = ctrl.wait_output_consumed(g, ctrl.config.buffer_chunks);
        return (g, true);
    }

    // 3. submit decoded chunks, holding back a crossfade tail while a
    // next song is on the way
    let hold_back = if player.queued || player.next_source.is_some() {
        player
            .play_format
            .map(|format| {
                crossfade::calculate_chunks(
                    &g.cross_fade,
                    format,
                    format,
                    CHUNK_FRAMES,
                    ctrl.config.buffer_chunks,
                )
            })
            .unwrap_or(0)
    } else {
        0
    };

    if player.pending.len() > hold_back {
        let chunk = player.pending.pop_front().unwrap();
        return submit_chunk(ctrl, player, g, chunk);
    }

    // 4. refill from the decoder
    let poll = match &player.source {
        Some(source) => source.poll(),
        None => return song_end(ctrl, player, g),
    };

    match poll {
        BlockPoll::Block(block) => {
            let song = player.song.clone();
            let tagged = block.tag.is_some() && !player.first_block;
            let chunk = player.make_chunk(block, player.rg_serial);

            if tagged {
                // mid-song tag (e.g. a stream announcing a new title)
                if let (Some(song), Some(tag)) = (song, chunk.tag.as_deref()) {
                    let mut updated = song;
                    updated.set_tag(tag.clone());
                    g.tagged_song = Some(updated);
                    ctrl.listener.on_player_tag_modified();
                }
            }

            player.pending.push_back(chunk);
            (g, true)
        }

        BlockPoll::Pending => (g, false),

        BlockPoll::Failed(e) => {
            error!("decoder failed: {e}");
            set_error(ctrl, &mut g, PlayerErrorKind::Decoder, e);
            let stale = player.source.take();
            let (g, _) = ctrl.cell.unlocked(g, || drop(stale));
            (g, true)
        }

        BlockPoll::Finished => song_end(ctrl, player, g),
    }
}

fn submit_chunk<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
    chunk: MusicChunk,
) -> (Guard<'a>, bool) {
    let time = chunk.time;
    let bit_rate = chunk.bit_rate;

    let outputs = Arc::clone(&ctrl.outputs);
    let (g2, result) = ctrl.cell.unlocked(g, || outputs.play(chunk));
    g = g2;

    match result {
        Ok(_seq) => {
            if let Some(time) = time {
                g.elapsed_time = time;
            }
            if bit_rate > 0 {
                g.bit_rate = bit_rate;
            }
            (g, true)
        }
        Err(e) => {
            error!("failed to play chunk: {e}");
            set_error(ctrl, &mut g, PlayerErrorKind::Output, e);
            let g = stop_playback(ctrl, player, g, false);
            ctrl.listener.on_player_sync();
            (g, false)
        }
    }
}

/// The current song has no more blocks: stage the next song, run the
/// crossfade overlap, and finally hand over (or stop).
///
/// Called once per loop round so a pending command is never starved.
fn song_end<'a>(
    ctrl: &'a Arc<PlayerControl>,
    player: &mut Player,
    mut g: Guard<'a>,
) -> (Guard<'a>, bool) {
    // open the next song's decoder as soon as it is known
    if player.next_source.is_none() && player.next_staged.is_none() && player.queued {
        let song = g.next_song.take();
        player.queued = false;

        if let Some(song) = song {
            let decoder = Arc::clone(&ctrl.decoder);
            let wake: Arc<dyn Wakeup> = Arc::clone(ctrl) as Arc<dyn Wakeup>;
            let (g2, result) = ctrl.cell.unlocked(g, || {
                DecoderSource::open(decoder.as_ref(), &song, chorus_common::SongTime::ZERO, wake)
            });
            g = g2;

            match result {
                Ok(source) => {
                    player.next_source = Some(source);
                    player.next_staged = Some(song);
                }
                Err(e) => {
                    warn!("failed to open next song {:?}: {e}", song.uri());
                    set_error(ctrl, &mut g, PlayerErrorKind::Decoder, e);
                }
            }
            return (g, true);
        }
    }

    // crossfade: pair each tail chunk with one chunk of the next song
    if !player.pending.is_empty() {
        let next_format = player.next_source.as_ref().map(|s| s.format());
        if let Some(next_format) = next_format {
            let format = player.play_format.unwrap_or(next_format);
            let xfade = crossfade::calculate_chunks(
                &g.cross_fade,
                format,
                next_format,
                CHUNK_FRAMES,
                ctrl.config.buffer_chunks,
            );

            if xfade > 0 {
                if player.pending.len() > xfade {
                    // only the last `xfade` chunks overlap; flush the rest
                    let chunk = player.pending.pop_front().unwrap();
                    return submit_chunk(ctrl, player, g, chunk);
                }

                if player.xfade_total == 0 {
                    player.xfade_total = player.pending.len();
                }

                let poll = player.next_source.as_ref().unwrap().poll();
                match poll {
                    BlockPoll::Block(block) => {
                        let other = player.make_next_chunk(block);
                        let mut chunk = player.pending.pop_front().unwrap();
                        let index = player.xfade_total - player.pending.len() - 1;
                        chunk.other = Some(Box::new(other));
                        chunk.mix_ratio = crossfade::mix_ratio(index, player.xfade_total);
                        return submit_chunk(ctrl, player, g, chunk);
                    }
                    BlockPoll::Pending => {
                        if g.command == PlayerCommand::None {
                            g = ctrl.cell.wait_worker(g);
                        }
                        return (g, true);
                    }
                    BlockPoll::Finished | BlockPoll::Failed(_) => {
                        // next song too short or broken: flush unmixed
                        player.xfade_total = 0;
                        let chunk = player.pending.pop_front().unwrap();
                        return submit_chunk(ctrl, player, g, chunk);
                    }
                }
            }
        }

        // no crossfade: flush the tail as-is
        let chunk = player.pending.pop_front().unwrap();
        return submit_chunk(ctrl, player, g, chunk);
    }

    // tail flushed: hand over to the next song, or stop
    player.xfade_total = 0;

    if let (Some(next_source), Some(next_song)) =
        (player.next_source.take(), player.next_staged.take())
    {
        let format_change = player.play_format != Some(next_source.format());

        g.current_instance = Some(next_song.instance());
        g.total_time = next_source.duration();
        g.elapsed_time = next_source.start_time();
        g.bit_rate = 0;

        player.rg_serial += 1;
        player.first_block = true;
        player.song = Some(next_song);
        let old_source = player.source.replace(next_source);

        let border_pause = g.border_pause;
        if border_pause {
            g.state = PlayerState::Pause;
        }

        let outputs = Arc::clone(&ctrl.outputs);
        let (g2, _) = ctrl.cell.unlocked(g, || {
            drop(old_source);
            if format_change {
                // play out the old format completely before reopening
                outputs.drain();
            }
        });
        g = g2;

        if format_change {
            player.output_open = false;
        }

        if border_pause {
            debug!("pausing at song border");
            ctrl.listener.on_border_pause();
            ctrl.listener.on_player_state_changed();
        }

        ctrl.listener.on_player_sync();
        return (g, true);
    }

    // end of the queue: wait until the outputs have consumed everything
    // still in the pipe, then drain and stop
    if ctrl.outputs.check_pipe() > 0 {
        let (g, _) = ctrl.wait_output_consumed(g, 1);
        return (g, true);
    }

    let had_error = g.error.is_some();
    let outputs = Arc::clone(&ctrl.outputs);
    let (g2, _) = ctrl.cell.unlocked(g, || {
        if !had_error {
            outputs.drain();
        }
    });
    g = g2;

    let g = stop_playback(ctrl, player, g, false);
    ctrl.listener.on_player_sync();
    (g, false)
}

impl Player {
    /// Convert a decoded block into a chunk for the outputs.
    fn make_chunk(&mut self, block: DecodedBlock, rg_serial: u64) -> MusicChunk {
        let format = self
            .source
            .as_ref()
            .map(|s| s.format())
            .or(self.play_format)
            .expect("chunk without a format");

        let mut chunk = MusicChunk::new(format, block.samples);
        chunk.time = Some(block.time);
        chunk.bit_rate = block.bit_rate;
        chunk.rg_serial = rg_serial;
        chunk.replay_gain = block
            .replay_gain
            .or_else(|| self.song.as_ref().and_then(|s| s.tag().replay_gain));

        if let Some(tag) = block.tag {
            chunk.tag = Some(Arc::new(tag));
        } else if self.first_block {
            if let Some(song) = &self.song {
                chunk.tag = Some(Arc::new(song.tag().clone()));
            }
        }

        self.first_block = false;
        chunk
    }

    /// Convert a block of the *next* song into a crossfade overlap chunk.
    fn make_next_chunk(&self, block: DecodedBlock) -> MusicChunk {
        let format = self
            .next_source
            .as_ref()
            .map(|s| s.format())
            .or(self.play_format)
            .expect("overlap chunk without a format");

        let mut chunk = MusicChunk::new(format, block.samples);
        chunk.time = Some(block.time);
        chunk.bit_rate = block.bit_rate;
        chunk.rg_serial = self.rg_serial + 1;
        chunk.replay_gain = block
            .replay_gain
            .or_else(|| self.next_staged.as_ref().and_then(|s| s.tag().replay_gain));
        if let Some(tag) = block.tag {
            chunk.tag = Some(Arc::new(tag));
        }
        chunk
    }
}
