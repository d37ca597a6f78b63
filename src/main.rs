use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::select;
use rolling_stats::Stats;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use headingfusion::config::FusionConfig;
use headingfusion::output::{OutputFormat, create_formatter};
use headingfusion::sensor::{LocationSource, Recording, ReplayRecord, ReplaySource};
use headingfusion::{FusionService, Snapshot};

#[derive(Parser, Debug)]
#[command(name = "headingfusion")]
#[command(about = "Replay a recorded compass/GPS session through the heading fusion engine")]
struct Args {
    /// Recording to replay (JSON lines)
    recording: PathBuf,

    /// Output format: text, json, csv
    #[arg(short = 'f', long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Replay speed multiplier
    #[arg(short = 's', long, default_value_t = 1.0)]
    speed: f64,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Run the manual calibration routine at the start of the replay
    #[arg(long)]
    calibrate: bool,

    /// Ignore GPS fixes in the recording
    #[arg(long)]
    no_location: bool,

    /// Print heading/accuracy statistics at the end
    #[arg(long)]
    summary: bool,

    /// Increase output verbosity
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Serialize)]
struct StatsSummary {
    count: usize,
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl StatsSummary {
    fn from_stats(stats: &Stats<f64>) -> Option<Self> {
        if stats.count == 0 {
            return None;
        }
        Some(Self {
            count: stats.count,
            mean: stats.mean,
            std_dev: stats.std_dev,
            min: stats.min,
            max: stats.max,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ReplaySummary {
    recording: String,
    heading_updates: usize,
    location_updates: usize,
    heading: Option<StatsSummary>,
    accuracy: Option<StatsSummary>,
    final_state: Snapshot,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match args.config {
        Some(ref path) => FusionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FusionConfig::default(),
    };

    let recording = Recording::load(&args.recording)
        .with_context(|| format!("Failed to read recording {}", args.recording.display()))?;
    let has_fixes = recording
        .records
        .iter()
        .any(|r| matches!(r, ReplayRecord::Fix { .. }));
    let track = has_fixes && !args.no_location;
    let replay_duration = recording.duration().div_f64(args.speed.max(f64::EPSILON));
    log::info!(
        "Replaying {} records ({:.1} s at {}x)",
        recording.records.len(),
        recording.duration().as_secs_f64(),
        args.speed
    );

    let replay = ReplaySource::new(recording, args.speed);
    let finished = replay.finished();
    let location: Option<Box<dyn LocationSource>> = if track {
        Some(Box::new(replay.location_source()))
    } else {
        None
    };

    let service = FusionService::spawn(&config, Box::new(replay.heading_source()), location)?;
    let headings = service.subscribe()?;
    let locations = service.subscribe_location()?;

    let formatter = create_formatter(args.format, args.verbose > 0);
    if let Some(header) = formatter.header() {
        println!("{}", header);
    }

    if track {
        service.start_tracking()?;
    } else {
        service.start()?;
    }
    if args.calibrate {
        service.calibrate()?;
    }

    let mut heading_stats: Stats<f64> = Stats::new();
    let mut accuracy_stats: Stats<f64> = Stats::new();
    let mut heading_updates = 0;
    let mut location_updates = 0;

    // let trailing notifications and a manual calibration run land
    let mut grace = config.rate_limit.settle() + Duration::from_millis(100);
    if args.calibrate {
        let run = config.calibration.tick_interval() * config.calibration.tick_budget as u32;
        grace = grace.max(run.saturating_sub(replay_duration) + Duration::from_millis(100));
    }
    let mut deadline = None;

    loop {
        let timeout = match deadline {
            Some(at) => crossbeam_channel::at(at),
            None => crossbeam_channel::never(),
        };
        select! {
            recv(headings) -> output => {
                let Ok(output) = output else { break };
                println!("{}", formatter.format_heading(&output));
                if output.is_active {
                    heading_updates += 1;
                    heading_stats.update(output.heading);
                    accuracy_stats.update(output.accuracy);
                }
            }
            recv(locations) -> state => {
                if let Ok(state) = state {
                    location_updates += 1;
                    println!("{}", formatter.format_location(&state));
                }
            }
            recv(finished) -> _ => {
                if deadline.is_none() {
                    log::info!("Recording finished");
                    deadline = Some(std::time::Instant::now() + grace);
                }
            }
            recv(timeout) -> _ => break,
        }
    }

    let final_state = service.snapshot()?;
    if track {
        service.stop_tracking()?;
    } else {
        service.stop()?;
    }
    service.shutdown();

    if args.summary {
        let summary = ReplaySummary {
            recording: args.recording.display().to_string(),
            heading_updates,
            location_updates,
            heading: StatsSummary::from_stats(&heading_stats),
            accuracy: StatsSummary::from_stats(&accuracy_stats),
            final_state,
        };
        print_summary(&summary, args.format)?;
    }

    Ok(())
}

fn print_summary(summary: &ReplaySummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text | OutputFormat::Csv => {
            eprintln!();
            eprintln!("=== {} ===", summary.recording);
            eprintln!(
                "Updates: {} heading, {} location",
                summary.heading_updates, summary.location_updates
            );
            for (name, stats) in [("Heading", &summary.heading), ("Accuracy", &summary.accuracy)] {
                match stats {
                    Some(s) => eprintln!(
                        "{:<9} mean {:>6.1} std {:>6.1} min {:>6.1} max {:>6.1} (n={})",
                        name, s.mean, s.std_dev, s.min, s.max, s.count
                    ),
                    None => eprintln!("{:<9} -", name),
                }
            }
            let output = summary.final_state.output;
            eprintln!(
                "Final: {:.1}° {} accuracy {:.0} calibrated={} (range {:.1}° over {} samples)",
                output.heading,
                output.cardinal(),
                output.accuracy,
                output.is_calibrated,
                summary.final_state.calibration.range(),
                summary.final_state.calibration.sample_count
            );
            if let Some(error) = output.error {
                eprintln!("Error: {}", error);
            }
            if let Some(error) = summary.final_state.location_error {
                eprintln!("Location error: {}", error);
            }
        }
    }
    Ok(())
}
