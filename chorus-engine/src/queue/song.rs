//! Detached song references.

use chorus_common::{SongTime, Tag};
use uuid::Uuid;

/// A song reference detached from any database: URI, tag snapshot and
/// playback offsets. Immutable once handed to the player.
///
/// Every `DetachedSong` carries an instance id that survives cloning, so
/// the playlist can recognise the exact copy it queued to the player even
/// after the queue has been edited.
#[derive(Debug, Clone)]
pub struct DetachedSong {
    uri: String,
    tag: Tag,
    start_offset: SongTime,
    end_offset: Option<SongTime>,
    mtime: Option<chrono::DateTime<chrono::Utc>>,
    instance: Uuid,
}

impl DetachedSong {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            tag: Tag::default(),
            start_offset: SongTime::ZERO,
            end_offset: None,
            mtime: None,
            instance: Uuid::new_v4(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_offsets(mut self, start: SongTime, end: Option<SongTime>) -> Self {
        self.start_offset = start;
        self.end_offset = end;
        self
    }

    pub fn with_mtime(mut self, mtime: chrono::DateTime<chrono::Utc>) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Replace the tag snapshot (used when a remote tag scan completes).
    pub fn set_tag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    pub fn start_offset(&self) -> SongTime {
        self.start_offset
    }

    pub fn end_offset(&self) -> Option<SongTime> {
        self.end_offset
    }

    pub fn mtime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.mtime
    }

    /// Identity of this detached copy; preserved by `clone()`.
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Copy with a fresh instance id.
    ///
    /// Used when the same queue entry is handed to the player a second
    /// time (repeat single song), so the handoff copy is distinguishable
    /// from the one currently playing.
    pub fn reinstance(&self) -> DetachedSong {
        let mut copy = self.clone();
        copy.instance = Uuid::new_v4();
        copy
    }

    /// Playable duration, when the tag knows the total duration.
    pub fn duration(&self) -> Option<SongTime> {
        let total = self.end_offset.or(self.tag.duration)?;
        Some(total.saturating_sub(self.start_offset))
    }
}

/// Resolves a URI into a playable song; implemented by the (external)
/// storage/database layer.
pub trait SongLoader: Send + Sync {
    fn load(&self, uri: &str) -> crate::error::Result<DetachedSong>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_survives_clone() {
        let song = DetachedSong::new("file:///a.flac");
        let copy = song.clone();
        assert_eq!(song.instance(), copy.instance());

        let other = DetachedSong::new("file:///a.flac");
        assert_ne!(song.instance(), other.instance());
    }

    #[test]
    fn test_duration_with_offsets() {
        let tag = Tag::builder().duration(SongTime::from_secs(60)).build();
        let song = DetachedSong::new("file:///a.flac")
            .with_tag(tag)
            .with_offsets(SongTime::from_secs(10), None);
        assert_eq!(song.duration(), Some(SongTime::from_secs(50)));
    }
}
