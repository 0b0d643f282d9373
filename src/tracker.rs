//! Sleep episode state machine
//!
//! Episode boundaries follow the presence of a usable heart-rate reading and
//! nothing else: a positive aggregate opens (or continues) an episode, an
//! active or empty tick closes it. The calibrated threshold plays no part
//! here so that calibration always learns from the same ground truth.
//!
//! Closing is two-phase. `step` only decides; a candidate long enough to keep
//! comes back as [`Transition::Finalize`] with the tracker still open, and
//! the caller runs [`finalize_episode`] outside its lock before calling
//! [`EpisodeTracker::commit`]. A failed finalize leaves the episode open so a
//! later tick retries the close.

use crate::error::DetectorError;
use crate::stats::representative_heart_rate;
use crate::store::SleepStore;
use crate::types::{SleepEpisode, TickSignal};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

/// Tracker state. At most one open episode exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Open { start: DateTime<Utc> },
}

/// Outcome of a single tracker step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle and still no usable reading
    Idle,
    /// A new episode opened at `start`
    Opened { start: DateTime<Utc> },
    /// The open episode continues
    Continued { start: DateTime<Utc> },
    /// The candidate was shorter than the minimum and was dropped
    Discarded { start: DateTime<Utc>, end: DateTime<Utc> },
    /// The candidate qualifies and must be persisted before committing
    Finalize { start: DateTime<Utc>, end: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    state: TrackerState,
    minimal_duration: Duration,
}

impl EpisodeTracker {
    pub fn new(minimal_duration: Duration) -> Self {
        Self {
            state: TrackerState::Idle,
            minimal_duration,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, TrackerState::Open { .. })
    }

    /// Advance the state machine with this tick's aggregate
    pub fn step(&mut self, signal: TickSignal, now: DateTime<Utc>) -> Transition {
        let reading = signal.effective().positive();

        match (self.state, reading) {
            (TrackerState::Idle, Some(hr)) => {
                self.state = TrackerState::Open { start: now };
                info!(episode_start = %now, effective_hr = hr, "sleep episode opened");
                Transition::Opened { start: now }
            }
            (TrackerState::Idle, None) => Transition::Idle,
            (TrackerState::Open { start }, Some(_)) => Transition::Continued { start },
            (TrackerState::Open { start }, None) => {
                let end = now.max(start);
                if end - start >= self.minimal_duration {
                    Transition::Finalize { start, end }
                } else {
                    self.state = TrackerState::Idle;
                    debug!(
                        episode_start = %start,
                        episode_end = %end,
                        "sleep episode too short, discarded"
                    );
                    Transition::Discarded { start, end }
                }
            }
        }
    }

    /// Close the episode that started at `start`.
    ///
    /// Returns false if the tracker is not holding that episode.
    pub fn commit(&mut self, start: DateTime<Utc>) -> bool {
        match self.state {
            TrackerState::Open { start: open } if open == start => {
                self.state = TrackerState::Idle;
                true
            }
            _ => false,
        }
    }
}

/// Persist a qualifying episode.
///
/// Loads the tick values recorded in `[start, end]`, derives the
/// representative heart rate and inserts the episode. `Ok(None)` means no
/// readings were recorded for the window and nothing was written.
///
/// An episode already stored under `start` is returned as is. A retried close
/// whose earlier insert landed after its timeout therefore writes nothing.
pub async fn finalize_episode(
    store: &dyn SleepStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<SleepEpisode>, DetectorError> {
    if let Some(existing) = store.episode_starting_at(start).await? {
        info!(
            episode_start = %start,
            episode_end = %existing.end,
            "sleep episode already persisted"
        );
        return Ok(Some(existing));
    }

    let values = store.tick_values_between(start, end).await?;

    let Some(representative) = representative_heart_rate(&values) else {
        return Ok(None);
    };

    let episode = SleepEpisode {
        start,
        end,
        representative_heart_rate: representative,
    };
    store.insert_episode(episode).await?;

    info!(
        episode_start = %start,
        episode_end = %end,
        representative_hr = representative,
        samples = values.len(),
        "sleep episode persisted"
    );
    Ok(Some(episode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::TickRecord;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 22, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_idle_opens_on_positive_value() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(3));

        assert_eq!(tracker.step(TickSignal::NoData, t(0)), Transition::Idle);
        assert_eq!(tracker.step(TickSignal::Active, t(1)), Transition::Idle);
        assert_eq!(
            tracker.step(TickSignal::Value(59.0), t(2)),
            Transition::Opened { start: t(2) }
        );
        assert_eq!(tracker.state(), TrackerState::Open { start: t(2) });
    }

    #[test]
    fn test_open_continues_on_positive_value() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(3));
        tracker.step(TickSignal::Value(59.0), t(0));

        // Value above any threshold still continues the episode
        assert_eq!(
            tracker.step(TickSignal::Value(88.0), t(1)),
            Transition::Continued { start: t(0) }
        );
    }

    #[test]
    fn test_short_episode_discarded() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(3));
        tracker.step(TickSignal::Value(59.0), t(0));

        assert_eq!(
            tracker.step(TickSignal::Active, t(2)),
            Transition::Discarded {
                start: t(0),
                end: t(2)
            }
        );
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_long_episode_awaits_commit() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(3));
        tracker.step(TickSignal::Value(59.0), t(0));

        let transition = tracker.step(TickSignal::NoData, t(3));
        assert_eq!(
            transition,
            Transition::Finalize {
                start: t(0),
                end: t(3)
            }
        );
        // Still open until the caller commits
        assert!(tracker.is_open());

        assert!(!tracker.commit(t(1)));
        assert!(tracker.commit(t(0)));
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_uncommitted_close_retries() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(3));
        tracker.step(TickSignal::Value(59.0), t(0));
        tracker.step(TickSignal::NoData, t(5));

        assert_eq!(
            tracker.step(TickSignal::NoData, t(6)),
            Transition::Finalize {
                start: t(0),
                end: t(6)
            }
        );
    }

    #[test]
    fn test_multi_day_duration_not_truncated() {
        let mut tracker = EpisodeTracker::new(Duration::minutes(180));
        tracker.step(TickSignal::Value(59.0), t(0));

        // 25 hours; a seconds-within-day delta would see only one hour here
        let end = t(25 * 60);
        assert_eq!(
            tracker.step(TickSignal::NoData, end),
            Transition::Finalize { start: t(0), end }
        );
    }

    #[tokio::test]
    async fn test_finalize_episode_persists_p95() {
        let store = MemoryStore::new();
        for (minute, value) in [(0, 55.0), (1, 58.0), (2, 60.0), (3, 57.0)] {
            store
                .record_tick(TickRecord {
                    timestamp: t(minute),
                    signal: TickSignal::Value(value),
                })
                .await
                .unwrap();
        }
        // Outside the window
        store
            .record_tick(TickRecord {
                timestamp: t(10),
                signal: TickSignal::Value(80.0),
            })
            .await
            .unwrap();

        let episode = finalize_episode(&store, t(0), t(4)).await.unwrap().unwrap();
        // sorted [55, 57, 58, 60], pos = 2.85 -> 58 + 0.85 * 2 = 59.7
        assert_eq!(episode.representative_heart_rate, 60);
        assert_eq!(store.recent_episodes(10).await.unwrap(), vec![episode]);
    }

    #[tokio::test]
    async fn test_finalize_keeps_already_stored_episode() {
        let store = MemoryStore::new();
        for minute in 0..3 {
            store
                .record_tick(TickRecord {
                    timestamp: t(minute),
                    signal: TickSignal::Value(58.0),
                })
                .await
                .unwrap();
        }

        let first = finalize_episode(&store, t(0), t(10)).await.unwrap().unwrap();
        let retried = finalize_episode(&store, t(0), t(11)).await.unwrap().unwrap();

        assert_eq!(retried, first);
        assert_eq!(retried.end, t(10));
        assert_eq!(store.recent_episodes(10).await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_finalize_without_samples_writes_nothing() {
        let store = MemoryStore::new();

        let result = finalize_episode(&store, t(0), t(4)).await.unwrap();
        assert!(result.is_none());
        assert!(store.recent_episodes(10).await.unwrap().is_empty());
    }
}
