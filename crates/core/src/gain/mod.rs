use crate::{
    config::GainConfig,
    detection::{BeatDetector, GainLevel},
    timing::TimingProvider,
    Result,
};

/// Auto-gain routine that runs outside the detector.
///
/// Clipping lowers the gain one step immediately. A window maximum that stays
/// below the weak-signal level for the raise delay raises it one step. The
/// detector only reports the gain it is told about.
#[derive(Debug, Clone, PartialEq)]
pub struct GainController {
    config: GainConfig,
    weak_since_us: Option<u64>,
    last_change_us: Option<u64>,
}

impl Default for GainController {
    fn default() -> Self {
        Self {
            config: GainConfig::default(),
            weak_since_us: None,
            last_change_us: None,
        }
    }
}

impl GainController {
    pub fn new(config: GainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// Inspects the detector and adjusts its gain hint. Returns the new level
    /// when it changed.
    pub fn update<C: TimingProvider>(
        &mut self,
        detector: &mut BeatDetector<C>,
        now_us: u64,
    ) -> Option<GainLevel> {
        if detector.take_clipping() {
            self.weak_since_us = None;
            let lower = detector.gain_level().lower()?;
            tracing::info!(gain_db = lower.decibels(), "clipping detected, lowering gain");
            return Some(self.apply(detector, lower, now_us));
        }

        if detector.max_value() >= self.config.weak_signal_level {
            self.weak_since_us = None;
            return None;
        }

        let weak_since = *self.weak_since_us.get_or_insert(now_us);
        let settled = self
            .last_change_us
            .map_or(true, |last| now_us.saturating_sub(last) >= self.config.raise_delay_us);
        if now_us.saturating_sub(weak_since) < self.config.raise_delay_us || !settled {
            return None;
        }

        let higher = detector.gain_level().raise()?;
        tracing::info!(
            gain_db = higher.decibels(),
            window_max = detector.max_value(),
            "weak signal, raising gain"
        );
        self.weak_since_us = Some(now_us);
        Some(self.apply(detector, higher, now_us))
    }

    pub fn reset(&mut self) {
        self.weak_since_us = None;
        self.last_change_us = None;
    }

    fn apply<C: TimingProvider>(
        &mut self,
        detector: &mut BeatDetector<C>,
        level: GainLevel,
        now_us: u64,
    ) -> GainLevel {
        detector.set_gain_level(level);
        self.last_change_us = Some(now_us);
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    fn feed(
        detector: &mut BeatDetector<&ManualClock>,
        clock: &ManualClock,
        value: u16,
        count: usize,
    ) {
        for _ in 0..count {
            clock.advance(1_000);
            detector.process_sample(value);
        }
    }

    #[test]
    fn clipping_steps_gain_down_until_floor() {
        let clock = ManualClock::default();
        let mut detector = BeatDetector::with_defaults(&clock);
        let mut gain = GainController::default();

        feed(&mut detector, &clock, 4095, 1);
        assert_eq!(gain.update(&mut detector, clock.now_us()), Some(GainLevel::Low));
        assert!(!detector.clipping_detected());

        feed(&mut detector, &clock, 4095, 1);
        assert_eq!(gain.update(&mut detector, clock.now_us()), None);
        assert_eq!(detector.gain_level(), GainLevel::Low);
    }

    #[test]
    fn weak_signal_raises_gain_after_delay() {
        let clock = ManualClock::default();
        let mut detector = BeatDetector::with_defaults(&clock);
        let mut gain = GainController::default();

        feed(&mut detector, &clock, 300, 80);
        assert!(detector.max_value() < 500);

        assert_eq!(gain.update(&mut detector, 100_000), None);
        assert_eq!(gain.update(&mut detector, 5_099_999), None);
        assert_eq!(gain.update(&mut detector, 5_100_000), Some(GainLevel::High));
        assert_eq!(detector.gain_level(), GainLevel::High);
        assert_eq!(gain.update(&mut detector, 20_000_000), None);
    }

    #[test]
    fn healthy_signal_leaves_gain_alone() {
        let clock = ManualClock::default();
        let mut detector = BeatDetector::with_defaults(&clock);
        let mut gain = GainController::default();

        feed(&mut detector, &clock, 2000, 80);
        assert_eq!(gain.update(&mut detector, 10_000_000), None);
        assert_eq!(detector.gain_level(), GainLevel::Medium);
    }
}
