//! SQLite-backed store
//!
//! Timestamps are stored as UTC epoch milliseconds. All SQLite calls run on
//! the blocking pool.

use super::SleepStore;
use crate::error::DetectorError;
use crate::types::{SleepEpisode, TickRecord};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS heartrate (
    ts_ms  INTEGER NOT NULL,
    value  REAL,
    signal TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS heartrate_ts_idx ON heartrate (ts_ms);
CREATE TABLE IF NOT EXISTS sleep (
    sleep_start_ms INTEGER NOT NULL,
    sleep_end_ms   INTEGER NOT NULL,
    heartrate      INTEGER NOT NULL
);
DROP INDEX IF EXISTS sleep_start_idx;
CREATE UNIQUE INDEX IF NOT EXISTS sleep_start_key ON sleep (sleep_start_ms);
";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, DetectorError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DetectorError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DetectorError::Store("sqlite connection lock poisoned".to_string()))?;
            f(&guard).map_err(DetectorError::from)
        })
        .await?
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, rusqlite::Error> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn row_to_episode(row: &Row<'_>) -> Result<SleepEpisode, rusqlite::Error> {
    Ok(SleepEpisode {
        start: from_millis(row.get(0)?)?,
        end: from_millis(row.get(1)?)?,
        representative_heart_rate: row.get(2)?,
    })
}

#[async_trait]
impl SleepStore for SqliteStore {
    async fn ensure_schema(&self) -> Result<(), DetectorError> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA_SQL)).await
    }

    async fn record_tick(&self, record: TickRecord) -> Result<(), DetectorError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO heartrate (ts_ms, value, signal) VALUES (?1, ?2, ?3)",
                params![
                    record.timestamp.timestamp_millis(),
                    record.signal.value(),
                    record.signal.kind()
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn tick_values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, DetectorError> {
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT value FROM heartrate
                 WHERE ts_ms BETWEEN ?1 AND ?2 AND value IS NOT NULL AND value > 0
                 ORDER BY ts_ms",
            )?;
            let rows = stmt.query_map(params![start_ms, end_ms], |row| row.get::<_, f64>(0))?;
            let values = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(values)
        })
        .await
    }

    async fn insert_episode(&self, episode: SleepEpisode) -> Result<(), DetectorError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sleep (sleep_start_ms, sleep_end_ms, heartrate) VALUES (?1, ?2, ?3)
                 ON CONFLICT (sleep_start_ms) DO NOTHING",
                params![
                    episode.start.timestamp_millis(),
                    episode.end.timestamp_millis(),
                    episode.representative_heart_rate
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn episode_starting_at(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<SleepEpisode>, DetectorError> {
        let start_ms = start.timestamp_millis();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT sleep_start_ms, sleep_end_ms, heartrate FROM sleep
                 WHERE sleep_start_ms = ?1",
                params![start_ms],
                row_to_episode,
            )
            .optional()
        })
        .await
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<SleepEpisode>, DetectorError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sleep_start_ms, sleep_end_ms, heartrate FROM sleep
                 ORDER BY sleep_start_ms DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], row_to_episode)?;
            let episodes = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(episodes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TickSignal;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_round_trip_filters_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_schema().await.unwrap();

        let records = [
            (0, TickSignal::Value(58.0)),
            (1, TickSignal::Active),
            (2, TickSignal::Value(61.5)),
            (3, TickSignal::NoData),
            (9, TickSignal::Value(70.0)),
        ];
        for (minute, signal) in records {
            store
                .record_tick(TickRecord {
                    timestamp: t(minute),
                    signal,
                })
                .await
                .unwrap();
        }

        assert_eq!(
            store.tick_values_between(t(0), t(3)).await.unwrap(),
            vec![58.0, 61.5]
        );
    }

    #[tokio::test]
    async fn test_episodes_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sleep.db");

        let episodes: Vec<SleepEpisode> = (0..5)
            .map(|day| SleepEpisode {
                start: t(day * 1440),
                end: t(day * 1440 + 420),
                representative_heart_rate: 55 + day as u16,
            })
            .collect();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.ensure_schema().await.unwrap();
            for episode in &episodes {
                store.insert_episode(*episode).await.unwrap();
            }
        }

        let store = SqliteStore::open(&path).unwrap();
        store.ensure_schema().await.unwrap();
        let recent = store.recent_episodes(2).await.unwrap();
        assert_eq!(recent, vec![episodes[4], episodes[3]]);
    }

    #[tokio::test]
    async fn test_duplicate_start_keeps_first_episode() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_schema().await.unwrap();

        let first = SleepEpisode {
            start: t(0),
            end: t(10),
            representative_heart_rate: 58,
        };
        store.insert_episode(first).await.unwrap();
        store
            .insert_episode(SleepEpisode {
                end: t(11),
                representative_heart_rate: 61,
                ..first
            })
            .await
            .unwrap();

        assert_eq!(store.recent_episodes(10).await.unwrap(), vec![first]);
        assert_eq!(store.episode_starting_at(t(0)).await.unwrap(), Some(first));
        assert_eq!(store.episode_starting_at(t(5)).await.unwrap(), None);
    }
}
