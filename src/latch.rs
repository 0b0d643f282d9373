//! At-most-once sleep onset notification

use crate::types::EffectiveHeartRate;

/// Whether the subject counts as asleep on this tick.
///
/// Level-triggered and independent of the episode tracker. A threshold of 0
/// never matches because only positive readings qualify.
pub fn is_asleep_now(active: bool, effective: EffectiveHeartRate, threshold: u16) -> bool {
    !active
        && effective
            .positive()
            .is_some_and(|hr| hr <= f64::from(threshold))
}

/// Edge detector that fires once per continuous run of asleep ticks
#[derive(Debug, Clone, Default)]
pub struct NotificationLatch {
    already_notified: bool,
}

impl NotificationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed this tick's predicate. Returns true when the notifier should fire.
    ///
    /// The latch is set before the notification goes out, so a failed
    /// delivery is not retried until the predicate falls and rises again.
    pub fn evaluate(&mut self, asleep: bool) -> bool {
        if !asleep {
            self.already_notified = false;
            return false;
        }
        if self.already_notified {
            return false;
        }
        self.already_notified = true;
        true
    }

    pub fn reset(&mut self) {
        self.already_notified = false;
    }

    pub fn is_latched(&self) -> bool {
        self.already_notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate() {
        let hr = EffectiveHeartRate::Value(59.0);

        assert!(is_asleep_now(false, hr, 65));
        assert!(is_asleep_now(false, EffectiveHeartRate::Value(65.0), 65));
        assert!(!is_asleep_now(false, EffectiveHeartRate::Value(66.0), 65));
        assert!(!is_asleep_now(true, hr, 65));
        assert!(!is_asleep_now(false, EffectiveHeartRate::NoSignal, 65));
        assert!(!is_asleep_now(false, EffectiveHeartRate::Active, 65));
    }

    #[test]
    fn test_zero_threshold_disables_detection() {
        assert!(!is_asleep_now(false, EffectiveHeartRate::Value(55.0), 0));
    }

    #[test]
    fn test_fires_once_per_run() {
        let mut latch = NotificationLatch::new();
        let fired: Vec<bool> = [true, true, true, false, true, true]
            .into_iter()
            .map(|asleep| latch.evaluate(asleep))
            .collect();

        assert_eq!(fired, vec![true, false, false, false, true, false]);
    }

    #[test]
    fn test_reset_rearms() {
        let mut latch = NotificationLatch::new();
        assert!(latch.evaluate(true));
        assert!(latch.is_latched());

        latch.reset();
        assert!(!latch.is_latched());
        assert!(latch.evaluate(true));
    }
}
