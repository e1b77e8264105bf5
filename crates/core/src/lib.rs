//! Core library for the clap metronome.
//!
//! Raw ADC samples go through the [`BeatDetector`], kick-class beats feed the
//! [`TempoTracker`], and the [`BeatPipeline`] ties both to a host loop. All
//! processing is synchronous and single-threaded; subscribers run in-line.

pub mod buffer;
pub mod config;
pub mod detection;
pub mod error;
pub mod gain;
pub mod pipeline;
pub mod synth;
pub mod tempo;
pub mod timing;

pub use buffer::RingBuffer;
pub use config::{AppConfig, DetectorConfig, GainConfig, PipelineConfig, TempoConfig};
pub use detection::{
    BeatDetector, BeatEvent, DetectionState, DetectorState, DetectorTelemetry, GainLevel,
};
pub use error::{MetronomeError, Result};
pub use gain::GainController;
pub use pipeline::{BeatPipeline, PipelineOutput};
pub use synth::{KickTrain, KickTrainSettings};
pub use tempo::{
    BpmUpdateEvent, IntervalHistogram, ShadowTracker, TempoEstimator, TempoState, TempoTracker,
    TimeoutReset,
};
pub use timing::{ManualClock, MonotonicClock, TimingProvider};
