//! Statistics surfacing.
//!
//! The song database lives outside the engine; this seam lets a partition
//! report combined statistics without knowing the storage layer.

use crate::error::Result;
use chorus_common::SongTime;
use std::time::Duration;

/// Statistics reported by the (external) song database.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub song_count: u64,
    pub artist_count: u64,
    pub album_count: u64,
    pub total_duration: SongTime,
}

/// Database access as far as the engine needs it.
pub trait DatabasePlugin: Send + Sync {
    fn stats(&self) -> Result<DatabaseStats>;

    /// When the database was last updated.
    fn update_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>>;
}

/// Combined partition statistics.
#[derive(Debug, Clone, Default)]
pub struct PartitionStats {
    /// Process uptime
    pub uptime: Duration,

    pub database: Option<DatabaseStats>,
    pub database_update_stamp: Option<chrono::DateTime<chrono::Utc>>,
}
