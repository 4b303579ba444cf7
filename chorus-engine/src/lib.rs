//! # Chorus Playback Engine (chorus-engine)
//!
//! The playback core of a multi-client music server: clients enqueue
//! songs and drive transport commands; the engine decodes the current
//! song, applies filters (replay gain, crossfade) and fans the audio out
//! to a dynamic set of independent output devices.
//!
//! **Architecture:** one player thread per partition fills a shared
//! [`pipe::MusicPipe`] with decoded chunks; one worker thread per output
//! consumes at its own pace and drives its device through an
//! open/play/pause/drain/close state machine with failure backoff.
//! Clients talk to both through single-slot condvar mailboxes and observe
//! changes through coalesced idle bits on a broadcast event bus.
//!
//! Protocol parsing, persistent playlists, tag databases, and the real
//! decoder/device/mixer plugins live outside this crate; their contracts
//! are the traits in [`decoder`], [`output::plugin`], [`mixer`],
//! [`queue::song`] and [`stats`].

pub mod chunk;
pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod idle;
pub mod mixer;
pub mod output;
pub mod partition;
pub mod pipe;
pub mod player;
pub mod queue;
pub mod stats;
mod sync;

pub use chunk::MusicChunk;
pub use config::{CrossFadeConfig, OutputConfig, PartitionConfig, PlayerConfig};
pub use error::{Error, PlayerErrorKind, Result};
pub use partition::{Partition, PartitionStatus};
pub use pipe::MusicPipe;
pub use player::{PlayerControl, PlayerState, PlayerStatus};
pub use sync::Wakeup;
