use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MetronomeError, Result};

/// Upper bound for [`DetectorConfig::window_size`]; the sample window is a
/// fixed arena of this many slots.
pub const WINDOW_CAPACITY: usize = 128;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detector: DetectorConfig,
    pub tempo: TempoConfig,
    pub gain: GainConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing sections and fields keep their
    /// defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.tempo.validate()?;
        self.gain.validate()?;
        self.pipeline.validate()
    }
}

/// Tuning of the adaptive-threshold beat detector. Amplitudes are raw ADC
/// units, durations are microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of recent samples used for min/max tracking.
    pub window_size: usize,
    /// Min/max, threshold and noise floor are refreshed every this many samples.
    pub recompute_interval: u32,
    pub threshold_factor: f32,
    /// Hysteresis band added on top of the adaptive threshold.
    pub threshold_margin: u16,
    /// Required height above the noise floor when the window range is narrow.
    pub min_signal_amplitude: u16,
    /// Window ranges below this span count as narrow.
    pub narrow_range_span: u16,
    pub noise_floor_percentile: u8,
    /// Value the window is primed with on init and reset.
    pub baseline_level: u16,
    pub debounce_us: u64,
    /// Rising edges longer than this are kick-class.
    pub kick_rise_time_us: u64,
    pub clipping_threshold: u16,
    pub telemetry_interval_us: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            recompute_interval: 16,
            threshold_factor: 0.8,
            threshold_margin: 80,
            min_signal_amplitude: 200,
            narrow_range_span: 400,
            noise_floor_percentile: 20,
            baseline_level: 2000,
            debounce_us: 50_000,
            kick_rise_time_us: 4_000,
            clipping_threshold: 4000,
            telemetry_interval_us: 500_000,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8..=WINDOW_CAPACITY).contains(&self.window_size) {
            return Err(MetronomeError::invalid(
                "window_size",
                format!("must be within 8..={WINDOW_CAPACITY}"),
            ));
        }
        if self.recompute_interval == 0 {
            return Err(MetronomeError::invalid(
                "recompute_interval",
                "must be at least 1",
            ));
        }
        if !(self.threshold_factor > 0.0 && self.threshold_factor <= 1.0) {
            return Err(MetronomeError::invalid(
                "threshold_factor",
                "must be within (0, 1]",
            ));
        }
        if self.noise_floor_percentile > 100 {
            return Err(MetronomeError::invalid(
                "noise_floor_percentile",
                "must be a percentage",
            ));
        }
        if self.telemetry_interval_us == 0 {
            return Err(MetronomeError::invalid(
                "telemetry_interval_us",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Tuning of the tempo tracker. Ratios are relative to a reference interval,
/// percentages are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub min_interval_us: u64,
    pub max_interval_us: u64,
    /// Coefficient of variation below which a reading is stable.
    pub stability_cv_percent: f32,
    /// Consecutive stable readings needed to lock.
    pub lock_stable_count: u8,
    /// Consecutive out-of-tolerance taps needed to unlock.
    pub unlock_deviation_count: u8,
    pub tempo_tolerance_percent: f32,
    /// Consecutive off-pattern taps needed to unlock.
    pub pattern_mismatch_unlock: u8,
    pub half_tempo_ratio: f32,
    pub double_tempo_ratio: f32,
    pub correction_count: u8,
    pub lock_timeout_us: u64,
    pub shadow_confidence_threshold: u8,
    pub shadow_confidence_max: u8,
    pub shadow_switch_min_bpm_diff: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_interval_us: 100_000,
            max_interval_us: 2_000_000,
            stability_cv_percent: 12.0,
            lock_stable_count: 3,
            unlock_deviation_count: 3,
            tempo_tolerance_percent: 4.0,
            pattern_mismatch_unlock: 5,
            half_tempo_ratio: 1.8,
            double_tempo_ratio: 0.6,
            correction_count: 5,
            lock_timeout_us: 3_000_000,
            shadow_confidence_threshold: 5,
            shadow_confidence_max: 10,
            shadow_switch_min_bpm_diff: 5.0,
        }
    }
}

impl TempoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval_us == 0 || self.min_interval_us >= self.max_interval_us {
            return Err(MetronomeError::invalid(
                "min_interval_us",
                "must be non-zero and below max_interval_us",
            ));
        }
        if self.stability_cv_percent <= 0.0 {
            return Err(MetronomeError::invalid(
                "stability_cv_percent",
                "must be positive",
            ));
        }
        if self.lock_stable_count == 0
            || self.unlock_deviation_count == 0
            || self.pattern_mismatch_unlock == 0
            || self.correction_count == 0
        {
            return Err(MetronomeError::invalid(
                "lock_stable_count",
                "lock, unlock and correction counts must be at least 1",
            ));
        }
        if !(self.double_tempo_ratio < 1.0 && self.half_tempo_ratio > 1.0) {
            return Err(MetronomeError::invalid(
                "half_tempo_ratio",
                "half ratio must exceed 1 and double ratio must be below 1",
            ));
        }
        if self.shadow_confidence_max < self.shadow_confidence_threshold {
            return Err(MetronomeError::invalid(
                "shadow_confidence_max",
                "must not be below shadow_confidence_threshold",
            ));
        }
        Ok(())
    }
}

/// External auto-gain routine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    /// A window maximum below this level counts as a weak signal.
    pub weak_signal_level: u16,
    /// Minimum time between two gain raises.
    pub raise_delay_us: u64,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            weak_signal_level: 500,
            raise_delay_us: 5_000_000,
        }
    }
}

impl GainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.raise_delay_us == 0 {
            return Err(MetronomeError::invalid(
                "raise_delay_us",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Host loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    /// Cadence of the tempo timeout check.
    pub heartbeat_interval_us: u64,
    pub auto_gain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            heartbeat_interval_us: 500_000,
            auto_gain: true,
        }
    }
}

impl PipelineConfig {
    /// Microseconds between two consecutive samples.
    pub fn sample_period_us(&self) -> u64 {
        1_000_000 / u64::from(self.sample_rate.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > 1_000_000 {
            return Err(MetronomeError::invalid(
                "sample_rate",
                "must be within 1..=1000000 Hz",
            ));
        }
        if self.heartbeat_interval_us == 0 {
            return Err(MetronomeError::invalid(
                "heartbeat_interval_us",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
