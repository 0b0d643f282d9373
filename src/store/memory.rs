//! In-process store
//!
//! Meant for tests and `sleepd --memory`. Tick aggregates are pruned once an
//! episode closes past them and are capped at [`DEFAULT_TICK_RETENTION`].

use super::SleepStore;
use crate::error::DetectorError;
use crate::types::{SleepEpisode, TickRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Tick aggregates kept in memory: one week at the default tick interval
pub const DEFAULT_TICK_RETENTION: usize = 7 * 24 * 60;

#[derive(Debug, Default)]
struct Tables {
    ticks: VecDeque<TickRecord>,
    episodes: Vec<SleepEpisode>,
}

/// Volatile store keeping both tables in memory
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    tick_retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_tick_retention(DEFAULT_TICK_RETENTION)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` tick aggregates, dropping the oldest
    pub fn with_tick_retention(retention: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            tick_retention: retention.max(1),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, DetectorError> {
        self.tables
            .lock()
            .map_err(|_| DetectorError::Store("memory store lock poisoned".to_string()))
    }

    /// Number of recorded tick aggregates
    pub fn tick_count(&self) -> usize {
        self.tables().map(|t| t.ticks.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SleepStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<(), DetectorError> {
        Ok(())
    }

    async fn record_tick(&self, record: TickRecord) -> Result<(), DetectorError> {
        let mut tables = self.tables()?;
        tables.ticks.push_back(record);
        while tables.ticks.len() > self.tick_retention {
            tables.ticks.pop_front();
        }
        Ok(())
    }

    async fn tick_values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, DetectorError> {
        let tables = self.tables()?;
        let mut in_range: Vec<&TickRecord> = tables
            .ticks
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .collect();
        in_range.sort_by_key(|r| r.timestamp);

        Ok(in_range
            .into_iter()
            .filter_map(|r| r.signal.value())
            .filter(|v| *v > 0.0)
            .collect())
    }

    async fn insert_episode(&self, episode: SleepEpisode) -> Result<(), DetectorError> {
        let mut tables = self.tables()?;
        if tables.episodes.iter().any(|e| e.start == episode.start) {
            return Ok(());
        }
        tables.episodes.push(episode);
        // Later episodes start after this one ends
        tables.ticks.retain(|r| r.timestamp >= episode.end);
        Ok(())
    }

    async fn episode_starting_at(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<SleepEpisode>, DetectorError> {
        Ok(self
            .tables()?
            .episodes
            .iter()
            .find(|e| e.start == start)
            .copied())
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<SleepEpisode>, DetectorError> {
        let mut episodes = self.tables()?.episodes.clone();
        episodes.sort_by(|a, b| b.start.cmp(&a.start));
        episodes.truncate(limit);
        Ok(episodes)
    }
}
