//! Adaptive sleep heart-rate threshold
//!
//! The threshold is the maximum representative heart rate among the most
//! recent persisted episodes. Using the maximum keeps the ceiling generous
//! while still tracking the subject. With no episodes the threshold is 0,
//! which keeps the asleep predicate false until the first episode lands.

use crate::error::DetectorError;
use crate::store::SleepStore;
use crate::types::SleepEpisode;

/// Default number of recent episodes the threshold is derived from
pub const DEFAULT_THRESHOLD_SAMPLES: usize = 7;

#[derive(Debug, Clone)]
pub struct ThresholdCalibrator {
    samples: usize,
    threshold: u16,
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_SAMPLES)
    }
}

impl ThresholdCalibrator {
    pub fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
            threshold: 0,
        }
    }

    /// Current threshold; 0 means detection is dormant
    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn set_threshold(&mut self, threshold: u16) {
        self.threshold = threshold;
    }

    /// Threshold implied by a set of episodes
    pub fn threshold_from(episodes: &[SleepEpisode]) -> u16 {
        episodes
            .iter()
            .map(|e| e.representative_heart_rate)
            .max()
            .unwrap_or(0)
    }

    /// Recompute the threshold from the store.
    ///
    /// Does not touch the calibrator; callers apply the result with
    /// [`ThresholdCalibrator::set_threshold`] so the store round trip can
    /// run without holding shared state.
    pub async fn recompute(store: &dyn SleepStore, samples: usize) -> Result<u16, DetectorError> {
        let recent = store.recent_episodes(samples).await?;
        Ok(Self::threshold_from(&recent))
    }
}
