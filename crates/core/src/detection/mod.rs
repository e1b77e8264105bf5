//! Adaptive-threshold percussive onset detector.
//!
//! One raw ADC sample goes in per call. The detector keeps a rolling window
//! of recent samples, derives a threshold and a noise floor from it every few
//! samples, and runs a four-state automaton
//! (`Idle -> RisingEdge -> Triggered -> Debounce -> Idle`) that turns a
//! threshold crossing followed by a falling sample into a [`BeatEvent`].
//! The length of the rising edge decides whether the beat is kick-class.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    buffer::RingBuffer,
    config::{DetectorConfig, WINDOW_CAPACITY},
    timing::TimingProvider,
    Result,
};

/// Position of the detection automaton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionState {
    /// Watching for a threshold crossing.
    #[default]
    Idle,
    /// Signal crossed the threshold and is still climbing.
    RisingEdge,
    /// A beat was emitted on the previous sample.
    Triggered,
    /// Refractory period after a beat.
    Debounce,
}

/// Microphone amplifier gain hint. The detector only reports it; changing it
/// is the job of an external routine such as [`crate::GainController`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl GainLevel {
    pub fn decibels(self) -> u8 {
        match self {
            Self::Low => 40,
            Self::Medium => 50,
            Self::High => 60,
        }
    }

    /// Next lower gain step, if any.
    pub fn lower(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    /// Next higher gain step, if any.
    pub fn raise(self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => None,
        }
    }
}

/// A detected beat. Produced once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub timestamp_us: u64,
    /// Peak amplitude reached during the rising edge.
    pub amplitude: u16,
    /// Adaptive threshold at detection time.
    pub threshold: u16,
    pub gain_level: GainLevel,
    pub rise_time_us: u64,
    /// Rise time exceeded the kick threshold.
    pub kick_only: bool,
}

/// Periodic detector snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorTelemetry {
    pub timestamp_us: u64,
    pub adc_value: u16,
    pub min_value: u16,
    pub max_value: u16,
    pub threshold: u16,
    pub noise_floor: u16,
    pub gain_level: GainLevel,
    pub state: DetectionState,
    pub beat_count: u32,
    pub false_positive_count: u32,
    pub clipping_detected: bool,
}

/// Everything the detector mutates while processing samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    window: RingBuffer<u16, WINDOW_CAPACITY>,
    threshold: u16,
    min_value: u16,
    max_value: u16,
    noise_floor: u16,
    samples_since_update: u32,
    state: DetectionState,
    previous_sample: u16,
    rising_edge_start_us: u64,
    rising_edge_start_value: u16,
    rising_edge_peak_value: u16,
    last_beat_timestamp_us: Option<u64>,
    beat_count: u32,
    false_positive_count: u32,
    gain_level: GainLevel,
    clipping_detected: bool,
    last_telemetry_us: Option<u64>,
}

impl DetectorState {
    fn new(config: &DetectorConfig) -> Self {
        let baseline = config.baseline_level;
        // A primed window keeps the first threshold derivations away from zero.
        let mut window = RingBuffer::with_limit(config.window_size);
        window.fill(baseline);

        Self {
            window,
            threshold: baseline,
            min_value: baseline,
            max_value: baseline,
            noise_floor: baseline,
            samples_since_update: 0,
            state: DetectionState::Idle,
            previous_sample: baseline,
            rising_edge_start_us: 0,
            rising_edge_start_value: 0,
            rising_edge_peak_value: 0,
            last_beat_timestamp_us: None,
            beat_count: 0,
            false_positive_count: 0,
            gain_level: GainLevel::default(),
            clipping_detected: false,
            last_telemetry_us: None,
        }
    }

    fn refresh_statistics(&mut self, config: &DetectorConfig) {
        let mut scratch = [0u16; WINDOW_CAPACITY];
        let len = self.window.copy_into(&mut scratch);
        if len == 0 {
            return;
        }
        let samples = &mut scratch[..len];

        self.min_value = samples.iter().copied().min().unwrap_or(self.min_value);
        self.max_value = samples.iter().copied().max().unwrap_or(self.max_value);

        let rank = (len - 1) * usize::from(config.noise_floor_percentile) / 100;
        let (_, floor, _) = samples.select_nth_unstable(rank);
        self.noise_floor = *floor;

        let threshold = if self.max_value > self.min_value {
            let range = f32::from(self.max_value - self.min_value);
            (f32::from(self.min_value) + config.threshold_factor * range) as u16
        } else {
            self.min_value
        };
        self.threshold = threshold.max(self.noise_floor);
    }
}

type BeatCallback = Box<dyn FnMut(&BeatEvent)>;
type TelemetryCallback = Box<dyn FnMut(&DetectorTelemetry)>;

/// Streaming beat detector driven one sample at a time.
pub struct BeatDetector<C> {
    config: DetectorConfig,
    clock: C,
    state: DetectorState,
    beat_callback: Option<BeatCallback>,
    telemetry_callback: Option<TelemetryCallback>,
}

impl<C: TimingProvider> BeatDetector<C> {
    /// Creates a detector after validating `config`.
    pub fn new(config: DetectorConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: DetectorState::new(&config),
            config,
            clock,
            beat_callback: None,
            telemetry_callback: None,
        })
    }

    /// Creates a detector using the reference tuning.
    pub fn with_defaults(clock: C) -> Self {
        let config = DetectorConfig::default();
        Self {
            state: DetectorState::new(&config),
            config,
            clock,
            beat_callback: None,
            telemetry_callback: None,
        }
    }

    /// Registers the beat subscriber, replacing any previous one.
    pub fn on_beat(&mut self, callback: impl FnMut(&BeatEvent) + 'static) {
        self.beat_callback = Some(Box::new(callback));
    }

    pub fn has_beat_callback(&self) -> bool {
        self.beat_callback.is_some()
    }

    /// Registers the telemetry subscriber, replacing any previous one.
    pub fn on_telemetry(&mut self, callback: impl FnMut(&DetectorTelemetry) + 'static) {
        self.telemetry_callback = Some(Box::new(callback));
    }

    pub fn has_telemetry_callback(&self) -> bool {
        self.telemetry_callback.is_some()
    }

    /// Feeds one raw sample through the detector.
    ///
    /// Subscribers run in-line before this returns. The emitted beat, if any,
    /// is also returned so a host loop can route it without a callback.
    pub fn process_sample(&mut self, amplitude: u16) -> Option<BeatEvent> {
        let now_us = self.clock.now_us();

        self.state.window.push(amplitude);
        self.state.samples_since_update += 1;
        if self.state.samples_since_update >= self.config.recompute_interval {
            self.state.refresh_statistics(&self.config);
            self.state.samples_since_update = 0;
        }

        if amplitude > self.config.clipping_threshold {
            self.state.clipping_detected = true;
        }

        let beat = self.advance(amplitude, now_us);
        self.state.previous_sample = amplitude;

        if let (Some(event), Some(callback)) = (beat.as_ref(), self.beat_callback.as_mut()) {
            callback(event);
        }
        self.publish_telemetry(now_us, amplitude);

        beat
    }

    /// Restores the freshly constructed state. Subscribers stay registered.
    pub fn reset(&mut self) {
        self.state = DetectorState::new(&self.config);
    }

    fn advance(&mut self, amplitude: u16, now_us: u64) -> Option<BeatEvent> {
        let config = &self.config;
        let state = &mut self.state;

        match state.state {
            DetectionState::Idle => {
                if amplitude <= state.threshold {
                    return None;
                }
                let clears_margin =
                    amplitude > state.threshold.saturating_add(config.threshold_margin);
                let narrow_range = state.max_value - state.min_value < config.narrow_range_span;
                let clears_floor = !narrow_range
                    || amplitude > state.noise_floor.saturating_add(config.min_signal_amplitude);

                if clears_margin && clears_floor {
                    state.state = DetectionState::RisingEdge;
                    state.rising_edge_start_us = now_us;
                    state.rising_edge_start_value = amplitude;
                    state.rising_edge_peak_value = amplitude;
                } else {
                    state.false_positive_count = state.false_positive_count.saturating_add(1);
                }
                None
            }
            DetectionState::RisingEdge => {
                if amplitude >= state.previous_sample {
                    state.rising_edge_peak_value = state.rising_edge_peak_value.max(amplitude);
                    return None;
                }

                let rise_time_us = now_us.saturating_sub(state.rising_edge_start_us);
                let event = BeatEvent {
                    timestamp_us: now_us,
                    amplitude: state.rising_edge_peak_value,
                    threshold: state.threshold,
                    gain_level: state.gain_level,
                    rise_time_us,
                    kick_only: rise_time_us > config.kick_rise_time_us,
                };
                state.state = DetectionState::Triggered;
                state.last_beat_timestamp_us = Some(now_us);
                state.beat_count = state.beat_count.saturating_add(1);

                tracing::debug!(
                    timestamp_us = now_us,
                    amplitude = event.amplitude,
                    rise_time_us,
                    kick_only = event.kick_only,
                    "beat detected"
                );
                Some(event)
            }
            DetectionState::Triggered => {
                state.state = DetectionState::Debounce;
                None
            }
            DetectionState::Debounce => {
                let elapsed = state
                    .last_beat_timestamp_us
                    .map_or(u64::MAX, |last| now_us.saturating_sub(last));
                if elapsed >= config.debounce_us {
                    state.state = DetectionState::Idle;
                }
                None
            }
        }
    }

    fn publish_telemetry(&mut self, now_us: u64, adc_value: u16) {
        let Some(last) = self.state.last_telemetry_us else {
            self.state.last_telemetry_us = Some(now_us);
            return;
        };
        if now_us.saturating_sub(last) < self.config.telemetry_interval_us {
            return;
        }
        self.state.last_telemetry_us = Some(now_us);

        let snapshot = self.telemetry(now_us, adc_value);
        tracing::trace!(?snapshot, "detector telemetry");
        if let Some(callback) = self.telemetry_callback.as_mut() {
            callback(&snapshot);
        }
    }

    /// Builds a snapshot of the current detector state.
    pub fn telemetry(&self, timestamp_us: u64, adc_value: u16) -> DetectorTelemetry {
        DetectorTelemetry {
            timestamp_us,
            adc_value,
            min_value: self.state.min_value,
            max_value: self.state.max_value,
            threshold: self.state.threshold,
            noise_floor: self.state.noise_floor,
            gain_level: self.state.gain_level,
            state: self.state.state,
            beat_count: self.state.beat_count,
            false_positive_count: self.state.false_positive_count,
            clipping_detected: self.state.clipping_detected,
        }
    }

    pub fn detection_state(&self) -> DetectionState {
        self.state.state
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn threshold(&self) -> u16 {
        self.state.threshold
    }

    pub fn min_value(&self) -> u16 {
        self.state.min_value
    }

    pub fn max_value(&self) -> u16 {
        self.state.max_value
    }

    pub fn noise_floor(&self) -> u16 {
        self.state.noise_floor
    }

    pub fn beat_count(&self) -> u32 {
        self.state.beat_count
    }

    pub fn false_positive_count(&self) -> u32 {
        self.state.false_positive_count
    }

    pub fn last_beat_timestamp_us(&self) -> Option<u64> {
        self.state.last_beat_timestamp_us
    }

    pub fn gain_level(&self) -> GainLevel {
        self.state.gain_level
    }

    /// Records the gain the amplifier is now running at. Reported in
    /// subsequent beats and telemetry.
    pub fn set_gain_level(&mut self, level: GainLevel) {
        self.state.gain_level = level;
    }

    pub fn clipping_detected(&self) -> bool {
        self.state.clipping_detected
    }

    /// Returns the clipping flag and clears it.
    pub fn take_clipping(&mut self) -> bool {
        std::mem::take(&mut self.state.clipping_detected)
    }
}

impl<C> fmt::Debug for BeatDetector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatDetector")
            .field("config", &self.config)
            .field("state", &self.state.state)
            .field("threshold", &self.state.threshold)
            .field("beat_count", &self.state.beat_count)
            .field("beat_callback", &self.beat_callback.is_some())
            .field("telemetry_callback", &self.telemetry_callback.is_some())
            .finish()
    }
}
