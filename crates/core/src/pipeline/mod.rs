use std::fmt;

use serde::Serialize;

use crate::{
    config::AppConfig,
    detection::{BeatDetector, BeatEvent, GainLevel},
    gain::GainController,
    tempo::{BpmUpdateEvent, TempoEstimator, TempoTracker, TimeoutReset},
    timing::TimingProvider,
    Result,
};

/// What a single sample produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub beat: Option<BeatEvent>,
    /// Present when a kick-class beat reached the tempo tracker, or when the
    /// heartbeat expired the tap history (a zero-tempo report).
    pub bpm: Option<BpmUpdateEvent>,
    pub gain_change: Option<GainLevel>,
    /// The heartbeat released a tempo lock.
    pub lock_released: bool,
}

impl PipelineOutput {
    pub fn is_empty(&self) -> bool {
        self.beat.is_none()
            && self.bpm.is_none()
            && self.gain_change.is_none()
            && !self.lock_released
    }
}

/// Host loop glue: detector, tempo tracker and optional auto-gain owned by one
/// caller and driven one sample at a time.
///
/// Only kick-class beats reach the tracker. The tempo timeout is checked on a
/// heartbeat measured with the detector's timing provider, so it keeps running
/// when taps stop.
pub struct BeatPipeline<C> {
    detector: BeatDetector<C>,
    tracker: TempoTracker,
    gain: Option<GainController>,
    heartbeat_interval_us: u64,
    last_heartbeat_us: Option<u64>,
}

impl<C: TimingProvider> BeatPipeline<C> {
    pub fn new(config: &AppConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let gain = if config.pipeline.auto_gain {
            Some(GainController::new(config.gain.clone())?)
        } else {
            None
        };

        Ok(Self {
            detector: BeatDetector::new(config.detector.clone(), clock)?,
            tracker: TempoTracker::new(config.tempo.clone())?,
            gain,
            heartbeat_interval_us: config.pipeline.heartbeat_interval_us,
            last_heartbeat_us: None,
        })
    }

    /// Attaches an additional tempo estimator to the tracker.
    pub fn with_estimator(mut self, estimator: impl TempoEstimator + 'static) -> Self {
        let tracker = std::mem::take(&mut self.tracker);
        self.tracker = tracker.with_estimator(estimator);
        self
    }

    pub fn process_sample(&mut self, amplitude: u16) -> PipelineOutput {
        let beat = self.detector.process_sample(amplitude);
        let now_us = self.detector.clock().now_us();

        let mut bpm = match beat {
            Some(event) if event.kick_only => Some(self.tracker.add_tap(event.timestamp_us)),
            Some(event) => {
                tracing::debug!(
                    timestamp_us = event.timestamp_us,
                    rise_time_us = event.rise_time_us,
                    "beat is not kick-class, skipping tempo"
                );
                None
            }
            None => None,
        };

        let gain_change = match self.gain.as_mut() {
            Some(gain) => gain.update(&mut self.detector, now_us),
            None => None,
        };
        let timeout = self.heartbeat(now_us);
        let lock_released = timeout.is_some_and(|reset| reset.lock_released);
        if let Some(reset) = timeout {
            bpm = Some(reset.event);
        }

        PipelineOutput {
            beat,
            bpm,
            gain_change,
            lock_released,
        }
    }

    fn heartbeat(&mut self, now_us: u64) -> Option<TimeoutReset> {
        let last = *self.last_heartbeat_us.get_or_insert(now_us);
        if now_us.saturating_sub(last) < self.heartbeat_interval_us {
            return None;
        }
        self.last_heartbeat_us = Some(now_us);
        self.tracker.poll_timeout(now_us)
    }

    /// Clears detector, tracker and gain state. Subscribers stay registered.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.tracker.clear();
        if let Some(gain) = self.gain.as_mut() {
            gain.reset();
        }
        self.last_heartbeat_us = None;
    }

    pub fn detector(&self) -> &BeatDetector<C> {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut BeatDetector<C> {
        &mut self.detector
    }

    pub fn tracker(&self) -> &TempoTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TempoTracker {
        &mut self.tracker
    }

    pub fn auto_gain(&self) -> bool {
        self.gain.is_some()
    }
}

impl<C> fmt::Debug for BeatPipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatPipeline")
            .field("detector", &self.detector)
            .field("tracker", &self.tracker)
            .field("auto_gain", &self.gain.is_some())
            .field("heartbeat_interval_us", &self.heartbeat_interval_us)
            .finish()
    }
}
