//! Event types for the chorus event system.
//!
//! The stable surface clients subscribe to is the set of idle bits: each bit
//! names a subsystem whose state has changed since the last dispatch. Bits
//! are coalesced between dispatches; raising a bit that is already pending
//! is a no-op. A few richer event variants ride the same bus for front-ends
//! that want more than the bit.

use crate::replay_gain::ReplayGainMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tokio::sync::broadcast;

/// A set of idle bits.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IdleMask(u32);

impl IdleMask {
    pub const NONE: IdleMask = IdleMask(0);

    /// Song database has been modified
    pub const DATABASE: IdleMask = IdleMask(1 << 0);
    /// A stored playlist has been modified
    pub const STORED_PLAYLIST: IdleMask = IdleMask(1 << 1);
    /// The play queue has been modified
    pub const PLAYLIST: IdleMask = IdleMask(1 << 2);
    /// The player state or current song has changed
    pub const PLAYER: IdleMask = IdleMask(1 << 3);
    /// A mixer volume has changed
    pub const MIXER: IdleMask = IdleMask(1 << 4);
    /// An output has been enabled, disabled or failed
    pub const OUTPUT: IdleMask = IdleMask(1 << 5);
    /// A playback option (repeat, random, ...) has changed
    pub const OPTIONS: IdleMask = IdleMask(1 << 6);
    /// A database update has started or finished
    pub const UPDATE: IdleMask = IdleMask(1 << 7);
    /// A sticker has been modified
    pub const STICKER: IdleMask = IdleMask(1 << 8);
    /// A client has subscribed or unsubscribed from a channel
    pub const SUBSCRIPTION: IdleMask = IdleMask(1 << 9);
    /// A message was received on a subscribed channel
    pub const MESSAGE: IdleMask = IdleMask(1 << 10);
    /// A neighbor plugin has found or lost something
    pub const NEIGHBOR: IdleMask = IdleMask(1 << 11);
    /// A storage mount point has changed
    pub const MOUNT: IdleMask = IdleMask(1 << 12);
    /// A partition was added, removed or changed
    pub const PARTITION: IdleMask = IdleMask(1 << 13);

    const NAMES: [(IdleMask, &'static str); 14] = [
        (IdleMask::DATABASE, "database"),
        (IdleMask::STORED_PLAYLIST, "stored_playlist"),
        (IdleMask::PLAYLIST, "playlist"),
        (IdleMask::PLAYER, "player"),
        (IdleMask::MIXER, "mixer"),
        (IdleMask::OUTPUT, "output"),
        (IdleMask::OPTIONS, "options"),
        (IdleMask::UPDATE, "update"),
        (IdleMask::STICKER, "sticker"),
        (IdleMask::SUBSCRIPTION, "subscription"),
        (IdleMask::MESSAGE, "message"),
        (IdleMask::NEIGHBOR, "neighbor"),
        (IdleMask::MOUNT, "mount"),
        (IdleMask::PARTITION, "partition"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: IdleMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: IdleMask) {
        self.0 |= other.0;
    }

    /// Keep only the bits also present in `other`.
    pub const fn intersect(self, other: IdleMask) -> IdleMask {
        IdleMask(self.0 & other.0)
    }

    /// Subsystem names for all bits set in this mask.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Look up a single bit by its subsystem name.
    pub fn from_name(name: &str) -> Option<IdleMask> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(bit, _)| *bit)
    }
}

impl BitOr for IdleMask {
    type Output = IdleMask;

    fn bitor(self, rhs: IdleMask) -> IdleMask {
        IdleMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for IdleMask {
    fn bitor_assign(&mut self, rhs: IdleMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for IdleMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

/// Player state as observed by clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    #[default]
    Stop,
    Play,
    Pause,
}

/// Chorus event types.
///
/// Events are broadcast via [`EventBus`] and can be serialized for
/// transmission to front-ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// One or more idle bits were raised in a partition
    Idle {
        /// Partition the change happened in
        partition: String,
        /// Coalesced bits since the previous dispatch
        mask: IdleMask,
        /// When the bits were dispatched
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Player state changed (Stop/Play/Pause)
    PlayerStateChanged {
        partition: String,
        state: PlayerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A mixer volume changed
    VolumeChanged {
        partition: String,
        /// New volume in percent (0-100), -1 when unknown
        volume: i32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The effective replay-gain mode changed
    ReplayGainModeChanged {
        partition: String,
        mode: ReplayGainMode,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus carrying [`EngineEvent`]s to all subscribed front-ends.
///
/// Sending never blocks; events are dropped for receivers that lag behind.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event. Having no receivers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let mut m = IdleMask::NONE;
        assert!(m.is_empty());

        m |= IdleMask::PLAYER;
        m.insert(IdleMask::MIXER);
        assert!(m.contains(IdleMask::PLAYER));
        assert!(m.contains(IdleMask::MIXER));
        assert!(!m.contains(IdleMask::OUTPUT));

        // re-raising a pending bit is a no-op
        let before = m;
        m |= IdleMask::PLAYER;
        assert_eq!(m, before);
    }

    #[test]
    fn test_mask_names() {
        let m = IdleMask::PLAYER | IdleMask::OPTIONS;
        assert_eq!(m.names(), vec!["player", "options"]);
        assert_eq!(IdleMask::from_name("mixer"), Some(IdleMask::MIXER));
        assert_eq!(IdleMask::from_name("bogus"), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::Idle {
            partition: "default".to_string(),
            mask: IdleMask::PLAYER,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Idle\""));
    }

    #[tokio::test]
    async fn test_bus_broadcast() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::PlayerStateChanged {
            partition: "default".to_string(),
            state: PlayerState::Play,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::PlayerStateChanged { state, .. } => {
                assert_eq!(state, PlayerState::Play);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
