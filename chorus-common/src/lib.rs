//! # Chorus Common Library
//!
//! Shared code for the chorus playback engine and its front-ends including:
//! - Audio format and song time primitives
//! - Tag snapshots and replay-gain metadata
//! - Event types (`EngineEvent` enum) and the idle-bit event bus

pub mod error;
pub mod events;
pub mod format;
pub mod replay_gain;
pub mod tag;
pub mod time;

pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus, IdleMask};
pub use format::AudioFormat;
pub use replay_gain::{ReplayGainInfo, ReplayGainMode, ReplayGainTuple};
pub use tag::Tag;
pub use time::{SignedSongTime, SongTime};
