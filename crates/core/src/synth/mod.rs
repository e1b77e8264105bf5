use serde::{Deserialize, Serialize};

use crate::{MetronomeError, Result};

/// Shape of a synthetic kick train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickTrainSettings {
    pub sample_rate: u32,
    pub bpm: f32,
    /// Duration of the linear attack ramp.
    pub rise_us: u64,
    pub decay_us: u64,
    pub baseline: u16,
    pub peak: u16,
    /// Half-width of the noise added between kicks.
    pub dither: u16,
    pub seed: u32,
}

impl Default for KickTrainSettings {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            bpm: 120.0,
            rise_us: 10_000,
            decay_us: 30_000,
            baseline: 2000,
            peak: 3500,
            dither: 20,
            seed: 0x5eed,
        }
    }
}

/// Endless stream of ADC samples with one kick per beat.
///
/// Each kick ramps linearly from the baseline to the peak over `rise_us`,
/// falls back over `decay_us` and rests on the baseline with a little
/// deterministic noise until the next beat. Attack and decay carry no noise
/// so the attack stays monotonic.
#[derive(Debug, Clone)]
pub struct KickTrain {
    settings: KickTrainSettings,
    beat_period_us: u64,
    index: u64,
    noise_state: u32,
}

impl KickTrain {
    pub fn new(settings: KickTrainSettings) -> Result<Self> {
        if settings.sample_rate == 0 {
            return Err(MetronomeError::msg("sample rate must be non-zero"));
        }
        if !(settings.bpm > 0.0 && settings.bpm <= 600.0) {
            return Err(MetronomeError::msg(format!("unsupported tempo {} BPM", settings.bpm)));
        }
        if settings.peak <= settings.baseline {
            return Err(MetronomeError::msg("kick peak must exceed the baseline"));
        }
        let beat_period_us = (60_000_000.0 / f64::from(settings.bpm)) as u64;
        if settings.rise_us + settings.decay_us >= beat_period_us {
            return Err(MetronomeError::msg("kick envelope is longer than the beat period"));
        }

        Ok(Self {
            noise_state: settings.seed,
            settings,
            beat_period_us,
            index: 0,
        })
    }

    pub fn sample_period_us(&self) -> u64 {
        1_000_000 / u64::from(self.settings.sample_rate)
    }

    /// Number of samples covering `duration_us`.
    pub fn samples_for(&self, duration_us: u64) -> usize {
        (duration_us.saturating_mul(u64::from(self.settings.sample_rate)) / 1_000_000) as usize
    }

    fn noise(&mut self) -> i32 {
        self.noise_state = self.noise_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let span = 2 * i32::from(self.settings.dither) + 1;
        ((self.noise_state >> 16) as i32 % span) - i32::from(self.settings.dither)
    }
}

impl Iterator for KickTrain {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let settings = &self.settings;
        let t_us = self.index * 1_000_000 / u64::from(settings.sample_rate);
        self.index += 1;

        let phase = t_us % self.beat_period_us;
        let swing = u64::from(settings.peak - settings.baseline);
        let value = if phase < settings.rise_us {
            u64::from(settings.baseline) + swing * phase / settings.rise_us.max(1)
        } else if phase < settings.rise_us + settings.decay_us {
            u64::from(settings.peak) - swing * (phase - settings.rise_us) / settings.decay_us.max(1)
        } else {
            let rest = i32::from(self.settings.baseline) + self.noise();
            return Some(rest.clamp(0, i32::from(u16::MAX)) as u16);
        };
        Some(value.min(u64::from(u16::MAX)) as u16)
    }
}
