use std::fmt;

use crate::config::TempoConfig;

/// Pluggable tempo estimator fed with every valid tap interval.
///
/// Estimators run beside the averaging tracker; their output never replaces
/// the reported BPM.
pub trait TempoEstimator {
    fn name(&self) -> &'static str;

    fn observe_interval(&mut self, interval_us: u64);

    /// Current estimate, if enough intervals have been seen.
    fn estimate_bpm(&self) -> Option<f32>;

    fn reset(&mut self);
}

const DEFAULT_BIN_WIDTH_US: u64 = 10_000;

/// Estimates tempo from the most common inter-tap interval.
///
/// Intervals are quantised into fixed-width bins spanning the accepted
/// interval range. The estimate is the weighted centre of the peak bin and its
/// two neighbours, which absorbs intervals split across a bin edge.
#[derive(Clone, PartialEq)]
pub struct IntervalHistogram {
    min_interval_us: u64,
    bin_width_us: u64,
    bins: Vec<u32>,
    observed: u32,
}

impl IntervalHistogram {
    pub fn new(min_interval_us: u64, max_interval_us: u64, bin_width_us: u64) -> Self {
        let bin_width_us = bin_width_us.max(1);
        let span = max_interval_us.saturating_sub(min_interval_us);
        let bin_count = (span / bin_width_us) as usize + 1;
        Self {
            min_interval_us,
            bin_width_us,
            bins: vec![0; bin_count],
            observed: 0,
        }
    }

    /// Histogram over the tracker's accepted interval range with 10 ms bins.
    pub fn for_config(config: &TempoConfig) -> Self {
        Self::new(config.min_interval_us, config.max_interval_us, DEFAULT_BIN_WIDTH_US)
    }

    pub fn observed(&self) -> u32 {
        self.observed
    }

    fn bin_index(&self, interval_us: u64) -> Option<usize> {
        let offset = interval_us.checked_sub(self.min_interval_us)?;
        let index = (offset / self.bin_width_us) as usize;
        (index < self.bins.len()).then_some(index)
    }

    fn bin_centre_us(&self, index: f64) -> f64 {
        self.min_interval_us as f64 + (index + 0.5) * self.bin_width_us as f64
    }
}

impl TempoEstimator for IntervalHistogram {
    fn name(&self) -> &'static str {
        "interval-histogram"
    }

    fn observe_interval(&mut self, interval_us: u64) {
        if let Some(index) = self.bin_index(interval_us) {
            self.bins[index] = self.bins[index].saturating_add(1);
            self.observed = self.observed.saturating_add(1);
        }
    }

    fn estimate_bpm(&self) -> Option<f32> {
        if self.observed < 2 {
            return None;
        }
        // Ties resolve to the shortest interval.
        let (peak, _) = self
            .bins
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, &count)| count)?;

        let lo = peak.saturating_sub(1);
        let hi = (peak + 1).min(self.bins.len() - 1);
        let mut weight = 0.0;
        let mut weighted_index = 0.0;
        for index in lo..=hi {
            let count = f64::from(self.bins[index]);
            weight += count;
            weighted_index += count * index as f64;
        }
        if weight == 0.0 {
            return None;
        }

        let interval_us = self.bin_centre_us(weighted_index / weight);
        Some((60_000_000.0 / interval_us) as f32)
    }

    fn reset(&mut self) {
        self.bins.iter_mut().for_each(|count| *count = 0);
        self.observed = 0;
    }
}

impl fmt::Debug for IntervalHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalHistogram")
            .field("min_interval_us", &self.min_interval_us)
            .field("bin_width_us", &self.bin_width_us)
            .field("bins", &self.bins.len())
            .field("observed", &self.observed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_two_intervals() {
        let mut histogram = IntervalHistogram::for_config(&TempoConfig::default());
        assert_eq!(histogram.estimate_bpm(), None);
        histogram.observe_interval(500_000);
        assert_eq!(histogram.estimate_bpm(), None);
        histogram.observe_interval(500_000);
        assert!(histogram.estimate_bpm().is_some());
    }

    #[test]
    fn peak_interval_wins_over_outliers() {
        let mut histogram = IntervalHistogram::for_config(&TempoConfig::default());
        for interval in [500_000, 503_000, 498_000, 1_000_000, 250_000, 501_000] {
            histogram.observe_interval(interval);
        }
        let bpm = histogram.estimate_bpm().unwrap();
        assert!((bpm - 120.0).abs() < 2.0, "estimated {bpm}");
    }

    #[test]
    fn ignores_intervals_outside_range() {
        let mut histogram = IntervalHistogram::for_config(&TempoConfig::default());
        histogram.observe_interval(50_000);
        histogram.observe_interval(2_500_000);
        assert_eq!(histogram.observed(), 0);

        histogram.observe_interval(2_000_000);
        histogram.observe_interval(100_000);
        assert_eq!(histogram.observed(), 2);

        histogram.reset();
        assert_eq!(histogram, IntervalHistogram::for_config(&TempoConfig::default()));
    }
}
