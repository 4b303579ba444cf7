//! The play queue.
//!
//! `Queue` is the pure data structure: a position-indexed list of songs
//! with stable client-visible ids, a playback-order permutation for random
//! mode, and per-song priorities that bias the not-yet-played part of the
//! order. `Playlist` (in `playlist`) layers current/queued tracking and
//! player coordination on top.

mod playlist;
pub mod song;

pub use playlist::{Playlist, QueueListener};
pub use song::{DetachedSong, SongLoader};

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

/// Single-song playback mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleMode {
    #[default]
    Off,
    On,
    /// Like `On` for one song border, then back to `Off`
    OneShot,
}

/// Consume-on-play mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeMode {
    #[default]
    Off,
    On,
    /// Consume the current song only, then back to `Off`
    OneShot,
}

struct Item {
    song: DetachedSong,
    id: u32,
    priority: u8,
    /// Queue version in which this item last changed
    version: u64,
}

/// Position-indexed song list with stable ids and a playback order.
pub struct Queue {
    items: Vec<Item>,
    /// Playback order: `order[i]` is the id played i-th. Identity order
    /// (position order) unless `random` is set.
    order: Vec<u32>,
    id_table: HashMap<u32, usize>,
    next_id: u32,
    version: u64,

    pub repeat: bool,
    pub random: bool,
    pub single: SingleMode,
    pub consume: ConsumeMode,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            order: Vec::new(),
            id_table: HashMap::new(),
            next_id: 1,
            version: 1,
            repeat: false,
            random: false,
            single: SingleMode::Off,
            consume: ConsumeMode::Off,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    fn rebuild_id_table(&mut self) {
        self.id_table = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id, pos))
            .collect();
    }

    pub fn get(&self, position: usize) -> Option<&DetachedSong> {
        self.items.get(position).map(|i| &i.song)
    }

    pub fn id_at(&self, position: usize) -> Option<u32> {
        self.items.get(position).map(|i| i.id)
    }

    pub fn position_of_id(&self, id: u32) -> Option<usize> {
        self.id_table.get(&id).copied()
    }

    pub fn song_by_id(&self, id: u32) -> Option<&DetachedSong> {
        self.position_of_id(id).and_then(|pos| self.get(pos))
    }

    pub fn priority_at(&self, position: usize) -> Option<u8> {
        self.items.get(position).map(|i| i.priority)
    }

    /// Playback order as a list of ids.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn order_index_of_id(&self, id: u32) -> Option<usize> {
        self.order.iter().position(|&o| o == id)
    }

    pub fn id_at_order(&self, order_index: usize) -> Option<u32> {
        self.order.get(order_index).copied()
    }

    /// Order index that follows `order_index`, honoring single and repeat.
    ///
    /// Returns `None` when playback should stop after the current song.
    pub fn next_order(&self, order_index: usize) -> Option<usize> {
        if self.single != SingleMode::Off {
            return if self.repeat && self.single == SingleMode::On {
                Some(order_index)
            } else {
                None
            };
        }

        if order_index + 1 < self.order.len() {
            Some(order_index + 1)
        } else if self.repeat && !self.order.is_empty() {
            Some(0)
        } else {
            None
        }
    }

    /// Append a song at the end; returns its new id.
    pub fn append(&mut self, song: DetachedSong) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.bump_version();

        let position = self.items.len();
        let version = self.version;
        self.items.push(Item {
            song,
            id,
            priority: 0,
            version,
        });
        self.id_table.insert(id, position);
        self.order.push(id);
        id
    }

    fn validate_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.items.len() {
            return Err(Error::Argument(format!(
                "bad song range {}:{}",
                range.start, range.end
            )));
        }
        Ok(())
    }

    /// Delete the songs in `range`. An empty range is a no-op.
    pub fn delete_range(&mut self, range: Range<usize>) -> Result<Vec<u32>> {
        self.validate_range(&range)?;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let removed: Vec<u32> = self
            .items
            .drain(range)
            .map(|item| item.id)
            .collect();
        self.order.retain(|id| !removed.contains(id));
        self.rebuild_id_table();
        self.bump_version();
        Ok(removed)
    }

    pub fn delete_position(&mut self, position: usize) -> Result<u32> {
        if position >= self.items.len() {
            return Err(Error::Argument(format!("bad song index: {position}")));
        }
        let mut removed = self.delete_range(position..position + 1)?;
        removed
            .pop()
            .ok_or_else(|| Error::Argument(format!("bad song index: {position}")))
    }

    pub fn delete_id(&mut self, id: u32) -> Result<u32> {
        let position = self
            .position_of_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?;
        self.delete_position(position)
    }

    /// Move `range` so that it begins at position `to` in the resulting
    /// list. `range.start == to` is a no-op.
    pub fn move_range(&mut self, range: Range<usize>, to: usize) -> Result<()> {
        self.validate_range(&range)?;
        let count = range.len();
        if count == 0 || range.start == to {
            return Ok(());
        }
        if to + count > self.items.len() {
            return Err(Error::Argument(format!("bad destination index: {to}")));
        }

        let moved: Vec<Item> = self.items.drain(range).collect();
        for (offset, item) in moved.into_iter().enumerate() {
            self.items.insert(to + offset, item);
        }
        self.rebuild_id_table();
        if !self.random {
            self.order = self.items.iter().map(|i| i.id).collect();
        }
        self.bump_version();
        Ok(())
    }

    pub fn swap_positions(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= self.items.len() || b >= self.items.len() {
            return Err(Error::Argument(format!("bad song index: {a}/{b}")));
        }
        if a == b {
            return Ok(());
        }
        self.items.swap(a, b);
        self.rebuild_id_table();
        if !self.random {
            self.order = self.items.iter().map(|i| i.id).collect();
        }
        self.bump_version();
        Ok(())
    }

    pub fn swap_ids(&mut self, id1: u32, id2: u32) -> Result<()> {
        let a = self
            .position_of_id(id1)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id1}")))?;
        let b = self
            .position_of_id(id2)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id2}")))?;
        self.swap_positions(a, b)
    }

    /// Shuffle the song positions within `range`.
    pub fn shuffle_range(&mut self, range: Range<usize>) -> Result<()> {
        self.validate_range(&range)?;
        if range.len() < 2 {
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        self.items[range].shuffle(&mut rng);
        self.rebuild_id_table();
        if !self.random {
            self.order = self.items.iter().map(|i| i.id).collect();
        }
        self.bump_version();
        Ok(())
    }

    /// Regenerate the order as a full random permutation.
    pub fn shuffle_order(&mut self) {
        let mut rng = rand::thread_rng();
        self.order.shuffle(&mut rng);
        self.sort_order_by_priority(0);
    }

    /// Restore identity (position) order.
    pub fn restore_order(&mut self) {
        self.order = self.items.iter().map(|i| i.id).collect();
    }

    /// Move `id` to the front of the order (used when random mode is
    /// enabled while this song is playing).
    pub fn move_order_to_front(&mut self, id: u32) {
        if let Some(idx) = self.order_index_of_id(id) {
            let id = self.order.remove(idx);
            self.order.insert(0, id);
        }
    }

    /// Shuffle the part of the order after `after` (exclusive), keeping
    /// already-played songs in place. Used when songs are appended while
    /// random mode is active.
    pub fn shuffle_order_tail(&mut self, after: usize) {
        let start = (after + 1).min(self.order.len());
        let mut rng = rand::thread_rng();
        self.order[start..].shuffle(&mut rng);
        self.sort_order_by_priority(start);
    }

    /// Stable-sort the order tail from `start` by descending priority.
    fn sort_order_by_priority(&mut self, start: usize) {
        let priorities: HashMap<u32, u8> = self
            .items
            .iter()
            .map(|item| (item.id, item.priority))
            .collect();
        self.order[start..].sort_by(|a, b| priorities[b].cmp(&priorities[a]));
    }

    /// Set the priority of all songs in `range`.
    ///
    /// `after_order` marks the boundary between played and pending songs;
    /// only the pending part of the order is re-sorted.
    pub fn set_priority_range(
        &mut self,
        range: Range<usize>,
        priority: u8,
        after_order: usize,
    ) -> Result<bool> {
        self.validate_range(&range)?;

        let mut modified = false;
        for item in &mut self.items[range] {
            if item.priority != priority {
                item.priority = priority;
                modified = true;
            }
        }

        if modified {
            self.bump_version();
            if self.random {
                let start = (after_order + 1).min(self.order.len());
                self.sort_order_by_priority(start);
            }
        }
        Ok(modified)
    }

    pub fn set_priority_id(&mut self, id: u32, priority: u8, after_order: usize) -> Result<bool> {
        let position = self
            .position_of_id(id)
            .ok_or_else(|| Error::Argument(format!("no such song id: {id}")))?;
        self.set_priority_range(position..position + 1, priority, after_order)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.id_table.clear();
        self.bump_version();
    }

    /// Update the tag of every queue copy of `uri`; returns whether
    /// anything changed.
    pub fn tag_modified(&mut self, uri: &str, tag: &chorus_common::Tag) -> bool {
        if self.items.iter().all(|item| item.song.uri() != uri) {
            return false;
        }

        self.bump_version();
        let version = self.version;
        for item in &mut self.items {
            if item.song.uri() == uri {
                item.song.set_tag(tag.clone());
                item.version = version;
            }
        }
        true
    }

    /// Positions of all queue copies of `uri`, newest first.
    pub fn positions_of_uri(&self, uri: &str) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.song.uri() == uri)
            .map(|(pos, _)| pos)
            .collect();
        positions.reverse();
        positions
    }

    /// A uniformly random order index, for starting random playback.
    pub fn random_order_index(&self) -> Option<usize> {
        if self.order.is_empty() {
            None
        } else {
            Some(rand::thread_rng().gen_range(0..self.order.len()))
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(uri: &str) -> DetachedSong {
        DetachedSong::new(uri)
    }

    fn filled(n: usize) -> Queue {
        let mut q = Queue::new();
        for i in 0..n {
            q.append(song(&format!("file:///{i}.flac")));
        }
        q
    }

    #[test]
    fn test_append_assigns_ids() {
        let mut q = Queue::new();
        let a = q.append(song("file:///a.flac"));
        let b = q.append(song("file:///b.flac"));
        assert_ne!(a, b);
        assert_eq!(q.position_of_id(a), Some(0));
        assert_eq!(q.position_of_id(b), Some(1));
        assert_eq!(q.order(), &[a, b]);
    }

    #[test]
    fn test_delete_range_empty_is_noop() {
        let mut q = filled(3);
        let version = q.version();
        assert!(q.delete_range(1..1).unwrap().is_empty());
        assert_eq!(q.len(), 3);
        assert_eq!(q.version(), version);
    }

    #[test]
    fn test_delete_range_out_of_bounds() {
        let mut q = filled(3);
        assert!(q.delete_range(1..5).is_err());
        assert!(q.delete_range(2..1).is_err());
    }

    #[test]
    fn test_delete_fixes_positions_and_order() {
        let mut q = filled(4);
        let id2 = q.id_at(2).unwrap();
        q.delete_range(0..2).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.position_of_id(id2), Some(0));
        assert_eq!(q.order().len(), 2);
    }

    #[test]
    fn test_move_range_same_start_is_noop() {
        let mut q = filled(4);
        let before: Vec<u32> = (0..4).map(|i| q.id_at(i).unwrap()).collect();
        q.move_range(1..3, 1).unwrap();
        let after: Vec<u32> = (0..4).map(|i| q.id_at(i).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_move_range() {
        let mut q = filled(4);
        let ids: Vec<u32> = (0..4).map(|i| q.id_at(i).unwrap()).collect();
        // move [1, 2] to the front
        q.move_range(1..3, 0).unwrap();
        let after: Vec<u32> = (0..4).map(|i| q.id_at(i).unwrap()).collect();
        assert_eq!(after, vec![ids[1], ids[2], ids[0], ids[3]]);
        // identity order follows positions
        assert_eq!(q.order(), after.as_slice());
    }

    #[test]
    fn test_swap() {
        let mut q = filled(3);
        let a = q.id_at(0).unwrap();
        let c = q.id_at(2).unwrap();
        q.swap_ids(a, c).unwrap();
        assert_eq!(q.id_at(0), Some(c));
        assert_eq!(q.id_at(2), Some(a));
    }

    #[test]
    fn test_next_order_repeat() {
        let mut q = filled(2);
        assert_eq!(q.next_order(0), Some(1));
        assert_eq!(q.next_order(1), None);
        q.repeat = true;
        assert_eq!(q.next_order(1), Some(0));
    }

    #[test]
    fn test_next_order_single() {
        let mut q = filled(3);
        q.single = SingleMode::On;
        assert_eq!(q.next_order(0), None);
        q.repeat = true;
        assert_eq!(q.next_order(0), Some(0));
        q.single = SingleMode::OneShot;
        assert_eq!(q.next_order(0), None);
    }

    #[test]
    fn test_priority_moves_ahead_in_random_order() {
        let mut q = filled(5);
        q.random = true;
        q.shuffle_order();
        let last_id = q.id_at(4).unwrap();
        q.set_priority_id(last_id, 10, 0).unwrap();
        // the prioritized song moved to the front of the pending tail
        // (order slot 0 counts as already playing)
        let idx = q.order_index_of_id(last_id).unwrap();
        assert!(idx <= 1, "prioritized song at order index {idx}");
    }

    #[test]
    fn test_shuffle_range_keeps_contents() {
        let mut q = filled(8);
        let mut before: Vec<u32> = (0..8).map(|i| q.id_at(i).unwrap()).collect();
        q.shuffle_range(2..6).unwrap();
        let mut after: Vec<u32> = (0..8).map(|i| q.id_at(i).unwrap()).collect();
        assert_eq!(before[0..2], after[0..2]);
        assert_eq!(before[6..8], after[6..8]);
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_tag_modified() {
        let mut q = Queue::new();
        q.append(song("file:///a.flac"));
        q.append(song("file:///b.flac"));
        q.append(song("file:///a.flac"));

        let tag = chorus_common::Tag::builder().title("A").build();
        assert!(q.tag_modified("file:///a.flac", &tag));
        assert_eq!(q.get(0).unwrap().tag().title.as_deref(), Some("A"));
        assert_eq!(q.get(2).unwrap().tag().title.as_deref(), Some("A"));
        assert_eq!(q.get(1).unwrap().tag().title, None);
        assert!(!q.tag_modified("file:///c.flac", &tag));
    }
}
