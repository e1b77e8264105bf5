use super::stats::{interval_stats, IntervalStats};
use crate::{buffer::RingBuffer, config::TempoConfig};

pub const SHADOW_CAPACITY: usize = 16;

/// Short-memory estimator fed the same taps as the primary history. It reacts
/// to tempo changes faster and builds confidence while its readings stay
/// stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowTracker {
    taps: RingBuffer<u64, SHADOW_CAPACITY>,
    stats: IntervalStats,
    confidence: u8,
}

impl ShadowTracker {
    pub fn observe(&mut self, timestamp_us: u64, config: &TempoConfig) {
        self.taps.push(timestamp_us);
        self.stats = interval_stats(&self.taps, config);
        if self.stats.is_stable {
            self.confidence = self
                .confidence
                .saturating_add(1)
                .min(config.shadow_confidence_max);
        } else {
            self.confidence = 0;
        }
    }

    pub fn bpm(&self) -> f32 {
        self.stats.bpm
    }

    pub fn coefficient_of_variation(&self) -> f32 {
        self.stats.coefficient_of_variation
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_builds_on_stable_readings_and_saturates() {
        let config = TempoConfig::default();
        let mut shadow = ShadowTracker::default();
        for i in 0..20u64 {
            shadow.observe(i * 400_000, &config);
        }
        assert_eq!(shadow.confidence(), config.shadow_confidence_max);
        assert_eq!(shadow.tap_count(), SHADOW_CAPACITY);
        assert!((shadow.bpm() - 150.0).abs() < 0.01);
    }

    #[test]
    fn unstable_reading_drops_confidence() {
        let config = TempoConfig::default();
        let mut shadow = ShadowTracker::default();
        for tap in [0, 500_000, 1_000_000, 1_500_000] {
            shadow.observe(tap, &config);
        }
        assert_eq!(shadow.confidence(), 2);
        shadow.observe(2_400_000, &config);
        assert_eq!(shadow.confidence(), 0);

        shadow.clear();
        assert_eq!(shadow, ShadowTracker::default());
    }
}
