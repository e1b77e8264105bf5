use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

use clap::{Parser, Subcommand};
use clap_metronome_core::{
    AppConfig, BeatEvent, BeatPipeline, BpmUpdateEvent, DetectorTelemetry, IntervalHistogram,
    KickTrain, KickTrainSettings, ManualClock, MetronomeError, PipelineOutput, TimingProvider,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn main() -> clap_metronome_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let output = OutputOptions {
        json: cli.json,
        telemetry: cli.telemetry,
        histogram: cli.histogram,
    };

    match cli.command {
        Commands::Analyze { input, sample_rate } => {
            run_analyze(&input, sample_rate, config, output)
        }
        Commands::Simulate {
            bpm,
            seconds,
            rise_ms,
        } => run_simulate(bpm, seconds, rise_ms, config, output),
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn run_analyze(
    input: &Path,
    sample_rate: Option<u32>,
    mut config: AppConfig,
    output: OutputOptions,
) -> clap_metronome_core::Result<()> {
    if let Some(rate) = sample_rate {
        config.pipeline.sample_rate = rate;
    }
    config.validate()?;
    tracing::info!(?input, sample_rate = config.pipeline.sample_rate, "analysing sample file");

    let text = std::fs::read_to_string(input)?;
    let samples = parse_samples(&text)?;
    run_pipeline(&config, samples, output)
}

fn run_simulate(
    bpm: f32,
    seconds: f32,
    rise_ms: f32,
    config: AppConfig,
    output: OutputOptions,
) -> clap_metronome_core::Result<()> {
    if !(seconds > 0.0) {
        return Err(MetronomeError::msg("simulation length must be positive"));
    }
    let settings = KickTrainSettings {
        sample_rate: config.pipeline.sample_rate,
        bpm,
        rise_us: (rise_ms * 1_000.0) as u64,
        ..KickTrainSettings::default()
    };
    let train = KickTrain::new(settings)?;
    let count = train.samples_for((seconds * 1_000_000.0) as u64);
    tracing::info!(bpm, seconds, rise_ms, samples = count, "simulating kick train");

    run_pipeline(&config, train.take(count), output)
}

fn run_pipeline(
    config: &AppConfig,
    samples: impl IntoIterator<Item = u16>,
    options: OutputOptions,
) -> clap_metronome_core::Result<()> {
    let clock = Rc::new(ManualClock::default());
    let mut pipeline = BeatPipeline::new(config, Rc::clone(&clock))?;
    if options.histogram {
        pipeline = pipeline.with_estimator(IntervalHistogram::for_config(&config.tempo));
    }

    let telemetry = Rc::new(RefCell::new(Vec::new()));
    if options.telemetry {
        let sink = Rc::clone(&telemetry);
        pipeline
            .detector_mut()
            .on_telemetry(move |snapshot| sink.borrow_mut().push(*snapshot));
    }

    let period_us = config.pipeline.sample_period_us();
    let mut summary = Summary::default();
    for sample in samples {
        let now_us = clock.advance(period_us);
        let out = pipeline.process_sample(sample);
        summary.samples += 1;

        for snapshot in telemetry.borrow_mut().drain(..) {
            emit(&Record::Telemetry(&snapshot), options.json)?;
        }
        if out.is_empty() {
            continue;
        }
        summary.observe(&out);
        report(&out, now_us, options.json)?;
    }

    let tracker = pipeline.tracker();
    let detector = pipeline.detector();
    tracing::info!(
        samples = summary.samples,
        beats = summary.beats,
        kicks = summary.kicks,
        bpm = tracker.bpm(),
        locked = tracker.is_locked(),
        false_positives = detector.false_positive_count(),
        clock_healthy = clock.is_healthy(),
        "finished"
    );

    if !options.json {
        println!(
            "samples={} beats={} kicks={} false_positives={} gain={}dB",
            summary.samples,
            summary.beats,
            summary.kicks,
            detector.false_positive_count(),
            detector.gain_level().decibels()
        );
        match tracker.locked_bpm() {
            Some(locked) => println!("tempo: {locked:.1} BPM (locked)"),
            None => println!(
                "tempo: {:.1} BPM ({})",
                tracker.current_bpm(),
                if tracker.is_stable() { "stable" } else { "unstable" }
            ),
        }
        if let (Some(name), Some(estimate)) = (tracker.estimator_name(), tracker.estimator_bpm()) {
            println!("{name}: {estimate:.1} BPM");
        }
    }
    Ok(())
}

fn report(output: &PipelineOutput, now_us: u64, json: bool) -> clap_metronome_core::Result<()> {
    if let Some(beat) = &output.beat {
        emit(&Record::Beat(beat), json)?;
    }
    if let Some(update) = &output.bpm {
        emit(&Record::Bpm(update), json)?;
    }
    if let Some(level) = output.gain_change {
        emit(
            &Record::GainChange {
                timestamp_us: now_us,
                gain_db: level.decibels(),
            },
            json,
        )?;
    }
    if output.lock_released {
        emit(&Record::LockReleased { timestamp_us: now_us }, json)?;
    }
    Ok(())
}

fn emit(record: &Record<'_>, json: bool) -> clap_metronome_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
        return Ok(());
    }

    match record {
        Record::Beat(beat) => println!(
            "{:>12} us  beat  amplitude={} threshold={} rise={}us{}",
            beat.timestamp_us,
            beat.amplitude,
            beat.threshold,
            beat.rise_time_us,
            if beat.kick_only { " kick" } else { "" }
        ),
        Record::Bpm(update) => println!(
            "{:>12} us  bpm   {:.1}{} taps={}",
            update.timestamp_us,
            update.bpm,
            if update.is_stable { " stable" } else { "" },
            update.tap_count
        ),
        Record::Telemetry(snapshot) => println!(
            "{:>12} us  telem adc={} min={} max={} threshold={} floor={} state={:?} beats={} fp={}",
            snapshot.timestamp_us,
            snapshot.adc_value,
            snapshot.min_value,
            snapshot.max_value,
            snapshot.threshold,
            snapshot.noise_floor,
            snapshot.state,
            snapshot.beat_count,
            snapshot.false_positive_count
        ),
        Record::GainChange { timestamp_us, gain_db } => {
            println!("{timestamp_us:>12} us  gain  {gain_db}dB")
        }
        Record::LockReleased { timestamp_us } => println!("{timestamp_us:>12} us  lock released"),
    }
    Ok(())
}

/// Parses ADC samples separated by whitespace or commas. Lines starting with
/// `#` are comments.
fn parse_samples(text: &str) -> clap_metronome_core::Result<Vec<u16>> {
    let mut samples = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        for token in line.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            let value = token.parse::<u16>().map_err(|err| {
                MetronomeError::msg(format!(
                    "line {}: invalid sample `{token}`: {err}",
                    line_no + 1
                ))
            })?;
            samples.push(value);
        }
    }
    Ok(samples)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Debug, Clone, Copy)]
struct OutputOptions {
    json: bool,
    telemetry: bool,
    histogram: bool,
}

#[derive(Debug, Default)]
struct Summary {
    samples: u64,
    beats: u64,
    kicks: u64,
}

impl Summary {
    fn observe(&mut self, output: &PipelineOutput) {
        if let Some(beat) = &output.beat {
            self.beats += 1;
            if beat.kick_only {
                self.kicks += 1;
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Beat(&'a BeatEvent),
    Bpm(&'a BpmUpdateEvent),
    Telemetry(&'a DetectorTelemetry),
    GainChange { timestamp_us: u64, gain_db: u8 },
    LockReleased { timestamp_us: u64 },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Clap and kick driven metronome", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Print events as JSON lines.
    #[arg(long, global = true)]
    json: bool,
    /// Also print periodic detector telemetry.
    #[arg(long, global = true)]
    telemetry: bool,
    /// Run the interval histogram estimator beside the tracker.
    #[arg(long, global = true)]
    histogram: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run recorded ADC samples through the detector and tempo tracker.
    Analyze {
        /// Text file with one ADC reading per token.
        input: PathBuf,
        /// Sample rate of the recording, overriding the configuration.
        #[arg(short, long)]
        sample_rate: Option<u32>,
    },
    /// Generate a synthetic kick train and track its tempo.
    Simulate {
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        #[arg(long, default_value_t = 8.0)]
        seconds: f32,
        /// Attack time of each kick; 4 ms or less is not kick-class.
        #[arg(long, default_value_t = 10.0)]
        rise_ms: f32,
    },
    /// Print the effective configuration as JSON.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators_and_comments() {
        let text = "# captured at 8 kHz\n2000 2001,1999\n\n 2500 ,3000\n";
        assert_eq!(parse_samples(text).unwrap(), vec![2000, 2001, 1999, 2500, 3000]);
    }

    #[test]
    fn reports_the_offending_line() {
        let err = parse_samples("2000\n2000 abc\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn cli_parses_simulate_defaults() {
        let cli = Cli::try_parse_from(["clap-metronome", "--json", "simulate"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Simulate { bpm, rise_ms, .. } => {
                assert_eq!(bpm, 120.0);
                assert_eq!(rise_ms, 10.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn json_records_are_tagged() {
        let line = serde_json::to_string(&Record::LockReleased { timestamp_us: 7 }).unwrap();
        assert_eq!(line, r#"{"type":"lock_released","timestamp_us":7}"#);
    }
}
