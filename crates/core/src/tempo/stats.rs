use crate::{buffer::RingBuffer, config::TempoConfig};

/// Interval statistics derived from one tap history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntervalStats {
    /// Intervals that were monotonic and inside the accepted range.
    pub valid_intervals: usize,
    pub average_interval_us: f32,
    pub bpm: f32,
    /// Sample standard deviation over the mean, in percent. Zero until two
    /// valid intervals exist.
    pub coefficient_of_variation: f32,
    pub is_stable: bool,
}

/// Computes mean tempo and stability over the taps in `history`.
///
/// Pairs that go backwards in time and intervals outside
/// `[min_interval_us, max_interval_us]` are skipped.
pub fn interval_stats<const N: usize>(
    history: &RingBuffer<u64, N>,
    config: &TempoConfig,
) -> IntervalStats {
    let mut intervals = [0u64; N];
    let mut count = 0;
    let mut previous: Option<u64> = None;

    for tap in history.iter() {
        if let Some(prev) = previous {
            let interval = tap.saturating_sub(prev);
            if tap > prev && is_valid_interval(interval, config) && count < N {
                intervals[count] = interval;
                count += 1;
            }
        }
        previous = Some(tap);
    }

    if count == 0 {
        return IntervalStats::default();
    }

    let valid = &intervals[..count];
    let mean = valid.iter().map(|&i| i as f64).sum::<f64>() / count as f64;
    let mut stats = IntervalStats {
        valid_intervals: count,
        average_interval_us: mean as f32,
        bpm: (60_000_000.0 / mean) as f32,
        ..IntervalStats::default()
    };

    if count >= 2 {
        let variance = valid
            .iter()
            .map(|&i| {
                let delta = i as f64 - mean;
                delta * delta
            })
            .sum::<f64>()
            / (count - 1) as f64;
        let cv = variance.sqrt() / mean * 100.0;
        stats.coefficient_of_variation = cv as f32;
        stats.is_stable = cv < f64::from(config.stability_cv_percent);
    }

    stats
}

pub(crate) fn is_valid_interval(interval_us: u64, config: &TempoConfig) -> bool {
    (config.min_interval_us..=config.max_interval_us).contains(&interval_us)
}
