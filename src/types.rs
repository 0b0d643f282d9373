//! Core types for the sleep detector
//!
//! This module defines the data that flows through each tick: raw heart-rate
//! samples, the per-tick aggregated signal, and finalized sleep episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single heart-rate reading pushed by the ingestion endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// When the sample was received (UTC)
    pub timestamp: DateTime<Utc>,
    /// Beats per minute
    pub value: u16,
}

impl HeartRateSample {
    pub fn new(timestamp: DateTime<Utc>, value: u16) -> Self {
        Self { timestamp, value }
    }
}

/// Aggregated value produced once per tick.
///
/// Exactly one variant holds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TickSignal {
    /// The activity flag is set; buffered samples were left untouched
    Active,
    /// Nothing was buffered since the last consuming tick
    NoData,
    /// Median of the buffered samples
    Value(f64),
}

impl TickSignal {
    /// Storage label for the signal kind
    pub fn kind(&self) -> &'static str {
        match self {
            TickSignal::Active => "active",
            TickSignal::NoData => "no_data",
            TickSignal::Value(_) => "value",
        }
    }

    /// Aggregated heart rate, if this tick carried one
    pub fn value(&self) -> Option<f64> {
        match self {
            TickSignal::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Resolve the effective heart rate used by the tracker and the latch
    pub fn effective(&self) -> EffectiveHeartRate {
        match *self {
            TickSignal::Active => EffectiveHeartRate::Active,
            TickSignal::NoData => EffectiveHeartRate::NoSignal,
            TickSignal::Value(v) if v > 0.0 => EffectiveHeartRate::Value(v),
            TickSignal::Value(_) => EffectiveHeartRate::NoSignal,
        }
    }
}

/// Heart rate as seen by the episode state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectiveHeartRate {
    /// Subject is moving; no usable reading
    Active,
    /// No reading arrived this tick
    NoSignal,
    /// A positive heart rate
    Value(f64),
}

impl EffectiveHeartRate {
    /// The positive heart rate, if any
    pub fn positive(&self) -> Option<f64> {
        match self {
            EffectiveHeartRate::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// A finalized sleep episode.
///
/// Only persisted episodes exist as values of this type; an open episode is
/// just a start timestamp inside the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepEpisode {
    /// Sleep onset (UTC)
    #[serde(rename = "sleep_start")]
    pub start: DateTime<Utc>,
    /// Sleep end (UTC), never before `start`
    #[serde(rename = "sleep_end")]
    pub end: DateTime<Utc>,
    /// Ceiling of the 95th percentile heart rate over the episode
    #[serde(rename = "heartrate")]
    pub representative_heart_rate: u16,
}

impl SleepEpisode {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// One persisted tick aggregate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub timestamp: DateTime<Utc>,
    pub signal: TickSignal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_effective_heart_rate() {
        assert_eq!(TickSignal::Active.effective(), EffectiveHeartRate::Active);
        assert_eq!(TickSignal::NoData.effective(), EffectiveHeartRate::NoSignal);
        assert_eq!(
            TickSignal::Value(59.0).effective(),
            EffectiveHeartRate::Value(59.0)
        );
        // A zero median is not a usable reading
        assert_eq!(
            TickSignal::Value(0.0).effective(),
            EffectiveHeartRate::NoSignal
        );
    }

    #[test]
    fn test_episode_serialization_field_names() {
        let episode = SleepEpisode {
            start: Utc.with_ymd_and_hms(2024, 1, 15, 22, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 16, 6, 30, 0).unwrap(),
            representative_heart_rate: 58,
        };

        let json: serde_json::Value = serde_json::to_value(episode).unwrap();
        assert_eq!(json["heartrate"], 58);
        assert_eq!(json["sleep_start"], "2024-01-15T22:30:00Z");
        assert_eq!(json["sleep_end"], "2024-01-16T06:30:00Z");
        assert_eq!(episode.duration().num_hours(), 8);
    }
}
