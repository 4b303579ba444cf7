//! Tag snapshots.
//!
//! A `Tag` is the immutable metadata snapshot carried by songs and chunks.
//! The engine never parses tags itself; decoders and the (external) tag
//! scanner produce them.

use crate::replay_gain::ReplayGainInfo;
use crate::time::SongTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<u32>,

    /// Total song duration, if the decoder knows it up front
    pub duration: Option<SongTime>,

    /// Replay-gain data found in the song's metadata
    pub replay_gain: Option<ReplayGainInfo>,
}

impl Tag {
    pub fn builder() -> TagBuilder {
        TagBuilder::default()
    }

    /// True when no field carries any information.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.track.is_none()
            && self.duration.is_none()
            && self.replay_gain.is_none()
    }
}

/// Incremental tag construction, used by decoder implementations.
#[derive(Debug, Default)]
pub struct TagBuilder {
    tag: Tag,
}

impl TagBuilder {
    pub fn title(mut self, v: impl Into<String>) -> Self {
        self.tag.title = Some(v.into());
        self
    }

    pub fn artist(mut self, v: impl Into<String>) -> Self {
        self.tag.artist = Some(v.into());
        self
    }

    pub fn album(mut self, v: impl Into<String>) -> Self {
        self.tag.album = Some(v.into());
        self
    }

    pub fn track(mut self, v: u32) -> Self {
        self.tag.track = Some(v);
        self
    }

    pub fn duration(mut self, v: SongTime) -> Self {
        self.tag.duration = Some(v);
        self
    }

    pub fn replay_gain(mut self, v: ReplayGainInfo) -> Self {
        self.tag.replay_gain = Some(v);
        self
    }

    pub fn build(self) -> Tag {
        self.tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let tag = Tag::builder()
            .title("Intro")
            .artist("Example")
            .duration(SongTime::from_secs(5))
            .build();
        assert_eq!(tag.title.as_deref(), Some("Intro"));
        assert!(!tag.is_empty());
    }

    #[test]
    fn test_empty() {
        assert!(Tag::default().is_empty());
    }
}
