//! Player subsystem: the command-driven player thread and its client
//! control surface.

mod control;
pub mod crossfade;
mod thread;

pub use control::{PlayerControl, PlayerStatus, SyncInfo};

pub use chorus_common::events::PlayerState;

/// Callbacks from the player towards the partition.
///
/// Implementations must be cheap and non-blocking; several are invoked
/// while the player mutex is held. The partition satisfies this by only
/// OR-ing deferred event bits.
pub trait PlayerListener: Send + Sync {
    /// An error occurred during autonomous playback
    fn on_player_error(&self);

    /// The player state (Stop/Play/Pause) changed
    fn on_player_state_changed(&self);

    /// The queue should be re-synchronized with the player
    fn on_player_sync(&self);

    /// The current song's tag was modified by the decoder
    fn on_player_tag_modified(&self);

    /// Playback paused at a song border (single/one-shot consume)
    fn on_border_pause(&self);

    /// A crossfade/mixramp option changed
    fn on_player_options_changed(&self);
}
