//! Time-series storage
//!
//! Two logical tables back the detector: the per-tick heart-rate aggregates
//! and the finalized sleep episodes. Both are append-only and queried by time.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::DetectorError;
use crate::types::{SleepEpisode, TickRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage backend for tick aggregates and sleep episodes
#[async_trait]
pub trait SleepStore: Send + Sync {
    /// Create both tables if they do not exist yet
    async fn ensure_schema(&self) -> Result<(), DetectorError>;

    /// Append one tick aggregate
    async fn record_tick(&self, record: TickRecord) -> Result<(), DetectorError>;

    /// Positive tick values recorded within `[start, end]`, oldest first
    async fn tick_values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, DetectorError>;

    /// Append a finalized episode.
    ///
    /// Episodes are keyed by start time. Inserting a second episode with the
    /// same start leaves the stored one untouched.
    async fn insert_episode(&self, episode: SleepEpisode) -> Result<(), DetectorError>;

    /// The stored episode starting exactly at `start`, if any
    async fn episode_starting_at(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<SleepEpisode>, DetectorError>;

    /// Up to `limit` episodes, newest start first
    async fn recent_episodes(&self, limit: usize) -> Result<Vec<SleepEpisode>, DetectorError>;
}
