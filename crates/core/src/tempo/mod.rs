//! Tempo tracking over kick-class beat timestamps.
//!
//! [`TempoTracker`] keeps a 64-tap primary history and derives the current
//! tempo and its stability from the mean and spread of the tap intervals. A
//! lock protocol sits on top of that continuous estimate: three stable
//! readings lock the reported tempo, and a run of deviating or off-pattern
//! taps releases it. A 16-tap [`ShadowTracker`] watches the same taps and can
//! move a lock to a new tempo once it is confident about it.

mod histogram;
mod shadow;
mod stats;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use histogram::{IntervalHistogram, TempoEstimator};
pub use shadow::{ShadowTracker, SHADOW_CAPACITY};
pub use stats::{interval_stats, IntervalStats};

use crate::{buffer::RingBuffer, config::TempoConfig, Result};

pub const TAP_CAPACITY: usize = 64;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Interval ratios (relative to the locked beat) that still fit the rhythm,
/// paired with the factor that maps such an interval back onto one beat.
const RHYTHM_PATTERNS: [(f64, f64, f64); 6] = [
    (0.90, 1.10, 1.0),
    (0.45, 0.55, 2.0),
    (1.80, 2.20, 0.5),
    (0.60, 0.73, 1.5),
    (0.225, 0.275, 4.0),
    (0.30, 0.37, 3.0),
];

/// Tempo report emitted after every tap and on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmUpdateEvent {
    /// Locked tempo when a lock is held, the continuous estimate otherwise.
    pub bpm: f32,
    pub is_stable: bool,
    pub timestamp_us: u64,
    pub tap_count: usize,
}

/// Outcome of a timeout that cleared the tap history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutReset {
    /// Zero-tempo report sent to the subscriber.
    pub event: BpmUpdateEvent,
    pub lock_released: bool,
}

/// Everything the tracker mutates while processing taps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempoState {
    taps: RingBuffer<u64, TAP_CAPACITY>,
    last_tap_us: Option<u64>,
    stats: IntervalStats,
    current_bpm: f32,
    locked_bpm: Option<f32>,
    stable_count: u8,
    deviation_count: u8,
    pattern_mismatch_count: u8,
    relative_deviation_percent: f32,
    half_tempo_count: u8,
    double_tempo_count: u8,
    tempo_correction_applied: bool,
    correction_baseline_us: Option<f64>,
    shadow: ShadowTracker,
}

type BpmCallback = Box<dyn FnMut(&BpmUpdateEvent)>;

pub struct TempoTracker {
    config: TempoConfig,
    state: TempoState,
    estimator: Option<Box<dyn TempoEstimator>>,
    bpm_callback: Option<BpmCallback>,
}

impl Default for TempoTracker {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TempoTracker {
    /// Creates a tracker after validating `config`.
    pub fn new(config: TempoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: TempoState::default(),
            estimator: None,
            bpm_callback: None,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: TempoConfig::default(),
            state: TempoState::default(),
            estimator: None,
            bpm_callback: None,
        }
    }

    /// Attaches an additional estimator that observes every valid interval.
    pub fn with_estimator(mut self, estimator: impl TempoEstimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }

    /// Registers the BPM subscriber, replacing any previous one.
    pub fn on_bpm_update(&mut self, callback: impl FnMut(&BpmUpdateEvent) + 'static) {
        self.bpm_callback = Some(Box::new(callback));
    }

    pub fn has_bpm_callback(&self) -> bool {
        self.bpm_callback.is_some()
    }

    /// Records a kick-class beat and recomputes the tempo.
    ///
    /// Callers must only pass beats that were already classified as kicks.
    /// The subscriber runs before this returns; the same event is returned.
    pub fn add_tap(&mut self, timestamp_us: u64) -> BpmUpdateEvent {
        let interval_us = self
            .state
            .last_tap_us
            .filter(|&last| timestamp_us > last)
            .map(|last| timestamp_us - last)
            .filter(|&interval| stats::is_valid_interval(interval, &self.config));
        let previous_average_us = self.state.stats.average_interval_us;

        self.state.taps.push(timestamp_us);
        self.state.last_tap_us = Some(timestamp_us);
        self.recalculate();

        if self.state.stats.is_stable {
            self.state.tempo_correction_applied = false;
        }
        if let Some(interval) = interval_us {
            self.detect_tempo_multiple(interval, f64::from(previous_average_us));
            if let Some(estimator) = self.estimator.as_mut() {
                estimator.observe_interval(interval);
            }
        }

        self.update_lock(interval_us);

        self.state.shadow.observe(timestamp_us, &self.config);
        if self.should_switch_tempo() {
            self.switch_to_shadow_tempo();
        }

        let event = self.event(timestamp_us);
        if let Some(callback) = self.bpm_callback.as_mut() {
            callback(&event);
        }
        event
    }

    /// Heartbeat check for a stalled tap stream.
    ///
    /// When taps exist and none arrived within the lock timeout, the whole
    /// tempo state is cleared and a zero-tempo event is emitted. Returns
    /// whether a lock was released.
    pub fn check_timeout(&mut self, now_us: u64) -> bool {
        self.poll_timeout(now_us).is_some_and(|reset| reset.lock_released)
    }

    /// Same as [`check_timeout`](Self::check_timeout), but hands back the
    /// emitted zero-tempo event whenever the history expired, locked or not.
    pub fn poll_timeout(&mut self, now_us: u64) -> Option<TimeoutReset> {
        let last = self.state.last_tap_us?;
        if now_us.saturating_sub(last) < self.config.lock_timeout_us {
            return None;
        }

        let lock_released = self.is_locked();
        if lock_released {
            tracing::info!(
                locked_bpm = self.locked_bpm().unwrap_or_default(),
                idle_us = now_us - last,
                "tempo lock released on timeout"
            );
        } else {
            tracing::debug!(idle_us = now_us - last, "tap history expired");
        }
        self.clear();

        let event = self.event(now_us);
        if let Some(callback) = self.bpm_callback.as_mut() {
            callback(&event);
        }
        Some(TimeoutReset {
            event,
            lock_released,
        })
    }

    /// Resets tempo state to the freshly constructed value. The subscriber and
    /// estimator stay attached; the estimator is reset.
    pub fn clear(&mut self) {
        self.state = TempoState::default();
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.reset();
        }
    }

    /// True when the shadow estimate is confident and far enough from the
    /// locked tempo to replace it.
    pub fn should_switch_tempo(&self) -> bool {
        let Some(locked) = self.state.locked_bpm else {
            return false;
        };
        let shadow = &self.state.shadow;
        shadow.confidence() >= self.config.shadow_confidence_threshold
            && (shadow.bpm() - locked).abs() >= self.config.shadow_switch_min_bpm_diff
    }

    /// Moves the lock to the shadow tempo and restarts the shadow history.
    pub fn switch_to_shadow_tempo(&mut self) {
        let shadow_bpm = self.state.shadow.bpm();
        if shadow_bpm <= 0.0 {
            return;
        }
        tracing::info!(
            from_bpm = self.locked_bpm().unwrap_or_default(),
            to_bpm = shadow_bpm,
            confidence = self.state.shadow.confidence(),
            "switching to shadow tempo"
        );
        self.state.locked_bpm = Some(shadow_bpm);
        self.state.stable_count = 0;
        self.state.deviation_count = 0;
        self.state.pattern_mismatch_count = 0;
        self.state.shadow.clear();
    }

    fn recalculate(&mut self) {
        self.state.stats = interval_stats(&self.state.taps, &self.config);
        self.state.current_bpm = self.state.stats.bpm;
    }

    /// Watches for runs of intervals that look like a missed beat (half tempo)
    /// or a subdivision (double tempo) and corrects the current tempo once a
    /// run is long enough.
    fn detect_tempo_multiple(&mut self, interval_us: u64, previous_average_us: f64) {
        let state = &mut self.state;
        let reference = match state.correction_baseline_us {
            Some(baseline) => baseline,
            None if previous_average_us > 0.0 => previous_average_us,
            None => return,
        };
        let ratio = interval_us as f64 / reference;

        if ratio > f64::from(self.config.half_tempo_ratio) {
            state.half_tempo_count = state.half_tempo_count.saturating_add(1);
            state.double_tempo_count = 0;
            state.correction_baseline_us = Some(reference);
        } else if ratio < f64::from(self.config.double_tempo_ratio) {
            state.double_tempo_count = state.double_tempo_count.saturating_add(1);
            state.half_tempo_count = 0;
            state.correction_baseline_us = Some(reference);
        } else {
            state.half_tempo_count = 0;
            state.double_tempo_count = 0;
            state.correction_baseline_us = None;
            return;
        }

        if state.tempo_correction_applied {
            return;
        }
        let baseline_bpm = (MICROS_PER_MINUTE / reference) as f32;
        let corrected = if state.half_tempo_count >= self.config.correction_count {
            baseline_bpm / 2.0
        } else if state.double_tempo_count >= self.config.correction_count {
            baseline_bpm * 2.0
        } else {
            return;
        };

        tracing::info!(
            baseline_bpm,
            corrected_bpm = corrected,
            half_run = state.half_tempo_count,
            double_run = state.double_tempo_count,
            "tempo multiple corrected"
        );
        state.current_bpm = corrected;
        state.tempo_correction_applied = true;
    }

    fn update_lock(&mut self, interval_us: Option<u64>) {
        match (self.state.locked_bpm, interval_us) {
            (Some(locked), Some(interval)) => self.validate_against_lock(locked, interval),
            (Some(_), None) => {}
            (None, _) => {
                let state = &mut self.state;
                if state.stats.is_stable {
                    state.stable_count = state.stable_count.saturating_add(1);
                } else {
                    state.stable_count = 0;
                }
                if state.stable_count >= self.config.lock_stable_count && state.current_bpm > 0.0 {
                    state.locked_bpm = Some(state.current_bpm);
                    state.deviation_count = 0;
                    state.pattern_mismatch_count = 0;
                    state.relative_deviation_percent = 0.0;
                    tracing::info!(
                        bpm = state.current_bpm,
                        cv = state.stats.coefficient_of_variation,
                        "tempo locked"
                    );
                }
            }
        }
    }

    /// Compares one interval with the locked beat. Intervals that fit a known
    /// subdivision are normalised to a full beat before the tolerance check.
    /// Intervals that fit none are out of tolerance and also extend the
    /// pattern mismatch run.
    fn validate_against_lock(&mut self, locked_bpm: f32, interval_us: u64) {
        let locked = f64::from(locked_bpm);
        let ratio = interval_us as f64 / (MICROS_PER_MINUTE / locked);
        let pattern = RHYTHM_PATTERNS
            .iter()
            .find(|(low, high, _)| (*low..=*high).contains(&ratio))
            .copied();

        let state = &mut self.state;
        let factor = match pattern {
            Some((_, _, factor)) => {
                state.pattern_mismatch_count = 0;
                factor
            }
            None => {
                state.pattern_mismatch_count = state.pattern_mismatch_count.saturating_add(1);
                tracing::debug!(
                    ratio,
                    mismatches = state.pattern_mismatch_count,
                    "interval does not fit the locked rhythm"
                );
                1.0
            }
        };

        let instant_bpm = MICROS_PER_MINUTE / (interval_us as f64 * factor);
        let deviation = ((instant_bpm - locked).abs() / locked * 100.0) as f32;
        state.relative_deviation_percent = deviation;

        let out_of_tolerance = pattern.is_none() || deviation > self.config.tempo_tolerance_percent;
        if out_of_tolerance {
            state.deviation_count = state.deviation_count.saturating_add(1);
        } else {
            state.deviation_count = 0;
        }

        if state.deviation_count >= self.config.unlock_deviation_count {
            self.unlock("tempo drifted out of tolerance");
        } else if state.pattern_mismatch_count >= self.config.pattern_mismatch_unlock {
            self.unlock("rhythm pattern lost");
        }
    }

    fn unlock(&mut self, reason: &'static str) {
        tracing::info!(
            locked_bpm = self.locked_bpm().unwrap_or_default(),
            current_bpm = self.state.current_bpm,
            reason,
            "tempo lock released"
        );
        let state = &mut self.state;
        state.locked_bpm = None;
        state.stable_count = 0;
        state.deviation_count = 0;
        state.pattern_mismatch_count = 0;
        state.relative_deviation_percent = 0.0;
    }

    fn event(&self, timestamp_us: u64) -> BpmUpdateEvent {
        BpmUpdateEvent {
            bpm: self.bpm(),
            is_stable: self.is_stable(),
            timestamp_us,
            tap_count: self.tap_count(),
        }
    }

    /// Reported tempo: the lock when held, the continuous estimate otherwise.
    pub fn bpm(&self) -> f32 {
        self.state.locked_bpm.unwrap_or(self.state.current_bpm)
    }

    pub fn current_bpm(&self) -> f32 {
        self.state.current_bpm
    }

    pub fn locked_bpm(&self) -> Option<f32> {
        self.state.locked_bpm
    }

    pub fn is_locked(&self) -> bool {
        self.state.locked_bpm.is_some()
    }

    pub fn is_stable(&self) -> bool {
        self.state.stats.is_stable
    }

    pub fn coefficient_of_variation(&self) -> f32 {
        self.state.stats.coefficient_of_variation
    }

    pub fn average_interval_us(&self) -> f32 {
        self.state.stats.average_interval_us
    }

    pub fn tap_count(&self) -> usize {
        self.state.taps.len()
    }

    pub fn last_tap_us(&self) -> Option<u64> {
        self.state.last_tap_us
    }

    pub fn stable_count(&self) -> u8 {
        self.state.stable_count
    }

    pub fn deviation_count(&self) -> u8 {
        self.state.deviation_count
    }

    pub fn pattern_mismatch_count(&self) -> u8 {
        self.state.pattern_mismatch_count
    }

    /// Deviation of the last in-pattern interval from the locked tempo, in
    /// percent.
    pub fn relative_deviation_percent(&self) -> f32 {
        self.state.relative_deviation_percent
    }

    pub fn half_tempo_count(&self) -> u8 {
        self.state.half_tempo_count
    }

    pub fn double_tempo_count(&self) -> u8 {
        self.state.double_tempo_count
    }

    pub fn tempo_correction_applied(&self) -> bool {
        self.state.tempo_correction_applied
    }

    pub fn shadow(&self) -> &ShadowTracker {
        &self.state.shadow
    }

    pub fn shadow_bpm(&self) -> f32 {
        self.state.shadow.bpm()
    }

    pub fn shadow_confidence(&self) -> u8 {
        self.state.shadow.confidence()
    }

    /// Estimate of the attached estimator, if any.
    pub fn estimator_bpm(&self) -> Option<f32> {
        self.estimator.as_ref().and_then(|estimator| estimator.estimate_bpm())
    }

    pub fn estimator_name(&self) -> Option<&'static str> {
        self.estimator.as_ref().map(|estimator| estimator.name())
    }

    pub fn state(&self) -> &TempoState {
        &self.state
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }
}

impl fmt::Debug for TempoTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempoTracker")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("estimator", &self.estimator_name())
            .field("bpm_callback", &self.bpm_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn tap_every(tracker: &mut TempoTracker, start_us: u64, interval_us: u64, count: usize) -> u64 {
        let mut t = start_us;
        for _ in 0..count {
            tracker.add_tap(t);
            t += interval_us;
        }
        t - interval_us
    }

    fn locked_at_120() -> (TempoTracker, u64) {
        let mut tracker = TempoTracker::with_defaults();
        let last = tap_every(&mut tracker, 0, 500_000, 5);
        assert!(tracker.is_locked());
        (tracker, last)
    }

    #[test]
    fn no_tempo_before_two_taps() {
        let mut tracker = TempoTracker::with_defaults();
        assert_eq!(tracker.bpm(), 0.0);
        let event = tracker.add_tap(1_000);
        assert_eq!(event.bpm, 0.0);
        assert!(!event.is_stable);
        assert_eq!(event.tap_count, 1);
    }

    #[test]
    fn steady_taps_report_120_and_lock_on_third_stable_reading() {
        let mut tracker = TempoTracker::with_defaults();
        let mut events = Vec::new();
        for tap in [0, 500_000, 1_000_000, 1_500_000] {
            events.push(tracker.add_tap(tap));
        }
        let last = events.last().unwrap();
        assert!((last.bpm - 120.0).abs() < 2.0);
        assert!(last.is_stable);
        assert_eq!(last.tap_count, 4);
        assert_eq!(tracker.stable_count(), 2);
        assert!(!tracker.is_locked());

        tracker.add_tap(2_000_000);
        let locked = tracker.locked_bpm().unwrap();
        assert!((locked - 120.0).abs() < 2.0);
    }

    #[test]
    fn zero_is_a_valid_first_timestamp() {
        let mut tracker = TempoTracker::with_defaults();
        tracker.add_tap(0);
        assert_eq!(tracker.last_tap_us(), Some(0));
        tracker.add_tap(600_000);
        assert!((tracker.current_bpm() - 100.0).abs() < 0.01);
    }

    #[test]
    fn drifting_taps_release_the_lock_after_three_deviations() {
        let (mut tracker, last) = locked_at_120();
        tracker.add_tap(last + 540_000);
        tracker.add_tap(last + 1_080_000);
        assert!(tracker.is_locked());
        assert_eq!(tracker.deviation_count(), 2);
        assert!(tracker.relative_deviation_percent() > 4.0);

        tracker.add_tap(last + 1_620_000);
        assert!(!tracker.is_locked());
        assert_eq!(tracker.deviation_count(), 0);
        assert!(tracker.tap_count() > 0);
    }

    #[test]
    fn in_tolerance_tap_resets_deviation_run() {
        let (mut tracker, last) = locked_at_120();
        tracker.add_tap(last + 540_000);
        tracker.add_tap(last + 1_080_000);
        tracker.add_tap(last + 1_580_000);
        assert!(tracker.is_locked());
        assert_eq!(tracker.deviation_count(), 0);
    }

    #[test]
    fn subdivisions_keep_the_lock() {
        let (mut tracker, mut t) = locked_at_120();
        for interval in [250_000, 250_000, 1_000_000, 500_000, 125_000, 125_000, 250_000] {
            t += interval;
            tracker.add_tap(t);
        }
        assert!(tracker.is_locked());
        assert_eq!(tracker.pattern_mismatch_count(), 0);
        assert_eq!(tracker.deviation_count(), 0);
    }

    #[test]
    fn large_tempo_change_releases_the_lock_after_three_taps() {
        let (mut tracker, last) = locked_at_120();
        tracker.add_tap(last + 650_000);
        tracker.add_tap(last + 1_300_000);
        assert!(tracker.is_locked());
        assert_eq!(tracker.deviation_count(), 2);
        assert_eq!(tracker.pattern_mismatch_count(), 2);
        assert!(tracker.relative_deviation_percent() > 20.0);

        tracker.add_tap(last + 1_950_000);
        assert!(!tracker.is_locked());
    }

    #[test]
    fn off_pattern_taps_release_the_lock_as_deviations() {
        let (mut tracker, mut t) = locked_at_120();
        for interval in [800_000, 380_000] {
            t += interval;
            tracker.add_tap(t);
        }
        assert!(tracker.is_locked());
        tracker.add_tap(t + 800_000);
        assert!(!tracker.is_locked());
    }

    #[test]
    fn mismatch_run_releases_the_lock_when_deviation_limit_is_higher() {
        let config = TempoConfig {
            unlock_deviation_count: 8,
            ..TempoConfig::default()
        };
        let mut tracker = TempoTracker::new(config).unwrap();
        let mut t = tap_every(&mut tracker, 0, 500_000, 5);
        assert!(tracker.is_locked());

        let intervals = [800_000, 380_000, 800_000, 380_000, 800_000];
        for (i, interval) in intervals.iter().enumerate() {
            assert!(tracker.is_locked(), "unlocked early at tap {i}");
            t += interval;
            tracker.add_tap(t);
        }
        assert!(!tracker.is_locked());
        assert_eq!(tracker.pattern_mismatch_count(), 0);
    }

    #[test]
    fn shadow_moves_lock_to_new_tempo() {
        let (mut tracker, last) = locked_at_120();
        tracker.add_tap(last + 600_000);
        assert!((tracker.locked_bpm().unwrap() - 120.0).abs() < 0.01);
        assert_eq!(tracker.shadow_confidence(), 4);

        tracker.add_tap(last + 1_200_000);
        let locked = tracker.locked_bpm().unwrap();
        assert!((locked - 112.5).abs() < 0.1, "locked at {locked}");
        assert_eq!(tracker.shadow_confidence(), 0);
        assert_eq!(tracker.shadow().tap_count(), 0);
        assert_eq!(tracker.pattern_mismatch_count(), 0);
    }

    #[test]
    fn shadow_switch_needs_a_locked_tempo() {
        let mut tracker = TempoTracker::with_defaults();
        tap_every(&mut tracker, 0, 500_000, 2);
        assert!(!tracker.should_switch_tempo());
    }

    #[test]
    fn half_tempo_run_is_corrected_after_five_intervals() {
        let mut tracker = TempoTracker::with_defaults();
        let last = tap_every(&mut tracker, 0, 500_000, 6);
        let mut t = last;
        for _ in 0..4 {
            t += 1_000_000;
            tracker.add_tap(t);
        }
        assert_eq!(tracker.half_tempo_count(), 4);
        assert!(!tracker.tempo_correction_applied());

        tracker.add_tap(t + 1_000_000);
        assert!(tracker.tempo_correction_applied());
        assert!((tracker.current_bpm() - 60.0).abs() < 0.01);
    }

    #[test]
    fn double_tempo_run_is_corrected_after_five_intervals() {
        let mut tracker = TempoTracker::with_defaults();
        let mut t = tap_every(&mut tracker, 0, 500_000, 6);
        for _ in 0..4 {
            t += 250_000;
            tracker.add_tap(t);
        }
        assert_eq!(tracker.double_tempo_count(), 4);
        assert!(!tracker.tempo_correction_applied());

        tracker.add_tap(t + 250_000);
        assert_eq!(tracker.double_tempo_count(), 5);
        assert!(tracker.tempo_correction_applied());
        assert!((tracker.current_bpm() - 240.0).abs() < 0.01);
    }

    #[test]
    fn in_band_interval_breaks_a_correction_run() {
        let mut tracker = TempoTracker::with_defaults();
        let mut t = tap_every(&mut tracker, 0, 500_000, 6);
        for interval in [1_000_000, 1_000_000, 500_000] {
            t += interval;
            tracker.add_tap(t);
        }
        assert_eq!(tracker.half_tempo_count(), 0);
        assert_eq!(tracker.double_tempo_count(), 0);
    }

    #[test]
    fn timeout_fires_exactly_at_three_seconds() {
        let (mut tracker, last) = locked_at_120();
        assert!(!tracker.check_timeout(last + 2_999_999));
        assert!(tracker.is_locked());

        assert!(tracker.check_timeout(last + 3_000_000));
        assert!(!tracker.is_locked());
        assert_eq!(tracker.tap_count(), 0);
        assert_eq!(tracker.bpm(), 0.0);
    }

    #[test]
    fn poll_timeout_reports_expiry_of_an_unlocked_history() {
        let mut tracker = TempoTracker::with_defaults();
        tracker.add_tap(0);
        tracker.add_tap(500_000);
        assert_eq!(tracker.poll_timeout(3_499_999), None);

        let reset = tracker.poll_timeout(3_500_000).expect("history should expire");
        assert!(!reset.lock_released);
        assert_eq!(reset.event.bpm, 0.0);
        assert_eq!(reset.event.tap_count, 0);
        assert_eq!(tracker.poll_timeout(9_000_000), None);
    }

    #[test]
    fn timeout_without_taps_is_a_no_op() {
        let mut tracker = TempoTracker::with_defaults();
        assert!(!tracker.check_timeout(10_000_000));
        assert_eq!(tracker.state(), TempoTracker::with_defaults().state());
    }

    #[test]
    fn timeout_emits_zero_tempo_event() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let mut tracker = TempoTracker::with_defaults();
        tracker.on_bpm_update(move |event| sink.borrow_mut().push(*event));

        tracker.add_tap(0);
        tracker.add_tap(500_000);
        assert!(!tracker.check_timeout(3_500_000));

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].bpm, 0.0);
        assert_eq!(events[2].tap_count, 0);
        assert_eq!(events[2].timestamp_us, 3_500_000);
    }

    #[test]
    fn clear_restores_a_fresh_state() {
        let histogram = IntervalHistogram::for_config(&TempoConfig::default());
        let mut tracker = TempoTracker::with_defaults().with_estimator(histogram);
        let mut t = tap_every(&mut tracker, 0, 500_000, 8);
        for interval in [1_000_000, 130_000, 2_400_000, 700_000] {
            t += interval;
            tracker.add_tap(t);
        }
        tracker.add_tap(t - 10);
        assert_ne!(tracker.state(), TempoTracker::with_defaults().state());

        tracker.clear();
        assert_eq!(tracker.state(), TempoTracker::with_defaults().state());
        assert_eq!(tracker.estimator_bpm(), None);
        assert_eq!(tracker.estimator_name(), Some("interval-histogram"));
    }

    #[test]
    fn estimator_observes_valid_intervals() {
        let histogram = IntervalHistogram::for_config(&TempoConfig::default());
        let mut tracker = TempoTracker::with_defaults().with_estimator(histogram);
        tap_every(&mut tracker, 0, 500_000, 4);
        let estimate = tracker.estimator_bpm().unwrap();
        assert!((estimate - 120.0).abs() < 2.0);
        assert!((tracker.bpm() - 120.0).abs() < 0.01);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = TempoConfig {
            lock_stable_count: 0,
            ..TempoConfig::default()
        };
        assert!(TempoTracker::new(config).is_err());
    }
}
