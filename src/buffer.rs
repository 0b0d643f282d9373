//! Sample buffering between ticks
//!
//! Valid heart-rate readings accumulate here until the next tick consumes
//! them as a single median value.

use crate::stats::median;
use crate::types::{HeartRateSample, TickSignal};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Upper bound on samples held between consuming ticks.
///
/// Samples keep accumulating while the activity flag is set; past this bound
/// the oldest are dropped.
pub const MAX_BUFFERED_SAMPLES: usize = 4096;

/// Accumulates valid samples and produces one aggregate per tick
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    low: u16,
    high: u16,
    values: VecDeque<u16>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create a buffer accepting values in the inclusive band `[low, high]`
    pub fn new(low: u16, high: u16) -> Self {
        Self::with_capacity(low, high, MAX_BUFFERED_SAMPLES)
    }

    pub fn with_capacity(low: u16, high: u16, capacity: usize) -> Self {
        Self {
            low,
            high,
            values: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Whether a value lies inside the validity band
    pub fn accepts(&self, value: u16) -> bool {
        (self.low..=self.high).contains(&value)
    }

    /// Append the sample if it lies inside the validity band.
    ///
    /// Returns whether the sample was kept. Out-of-band samples are dropped
    /// without error.
    pub fn record(&mut self, sample: HeartRateSample) -> bool {
        if !self.accepts(sample.value) {
            return false;
        }
        self.values.push_back(sample.value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
        true
    }

    /// Record a raw reading as received over the wire.
    ///
    /// The band check runs on the raw value; accepted readings are rounded to
    /// whole beats per minute.
    pub fn record_reading(&mut self, timestamp: DateTime<Utc>, bpm: f64) -> bool {
        if !bpm.is_finite() || bpm < f64::from(self.low) || bpm > f64::from(self.high) {
            return false;
        }
        self.record(HeartRateSample::new(timestamp, bpm.round() as u16))
    }

    /// Produce this tick's aggregate.
    ///
    /// While `active` the buffer is left untouched and `Active` is returned.
    /// Otherwise an empty buffer yields `NoData` and a non-empty buffer is
    /// consumed into its median.
    pub fn drain_aggregate(&mut self, active: bool) -> TickSignal {
        if active {
            return TickSignal::Active;
        }
        let values: Vec<f64> = self.values.drain(..).map(f64::from).collect();
        match median(&values) {
            Some(m) => TickSignal::Value(m),
            None => TickSignal::NoData,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: u16) -> HeartRateSample {
        HeartRateSample::new(Utc::now(), value)
    }

    #[test]
    fn test_band_is_inclusive() {
        let mut buffer = SampleBuffer::new(40, 90);

        assert!(buffer.record(sample(40)));
        assert!(buffer.record(sample(90)));
        assert!(!buffer.record(sample(39)));
        assert!(!buffer.record(sample(91)));
        assert!(!buffer.record(sample(999)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_raw_reading_band_checked_before_rounding() {
        let mut buffer = SampleBuffer::new(40, 90);

        assert!(buffer.record_reading(Utc::now(), 62.4));
        assert!(!buffer.record_reading(Utc::now(), 90.4));
        assert!(!buffer.record_reading(Utc::now(), -5.0));
        assert!(!buffer.record_reading(Utc::now(), f64::NAN));
        assert_eq!(buffer.drain_aggregate(false), TickSignal::Value(62.0));
    }

    #[test]
    fn test_drain_median_and_reset() {
        let mut buffer = SampleBuffer::new(40, 90);
        for v in [58, 60, 59] {
            buffer.record(sample(v));
        }

        assert_eq!(buffer.drain_aggregate(false), TickSignal::Value(59.0));
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain_aggregate(false), TickSignal::NoData);
    }

    #[test]
    fn test_out_of_band_never_in_median() {
        let mut buffer = SampleBuffer::new(40, 90);
        for v in [10, 50, 200, 52, 54] {
            buffer.record(sample(v));
        }

        assert_eq!(buffer.drain_aggregate(false), TickSignal::Value(52.0));
    }

    #[test]
    fn test_active_preserves_buffer() {
        let mut buffer = SampleBuffer::new(40, 90);
        buffer.record(sample(70));

        assert_eq!(buffer.drain_aggregate(true), TickSignal::Active);
        assert_eq!(buffer.len(), 1);

        // Consumed on the next inactive tick
        assert_eq!(buffer.drain_aggregate(false), TickSignal::Value(70.0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut buffer = SampleBuffer::with_capacity(40, 90, 3);
        for v in [41, 42, 43, 44] {
            buffer.record(sample(v));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.drain_aggregate(false), TickSignal::Value(43.0));
    }
}
