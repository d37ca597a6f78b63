use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use headingfusion::simulation::{GpsTrack, RotationProfile, Scenario, generate_recording};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Steady,
    Turn,
    Sweep,
}

#[derive(Parser, Debug)]
#[command(name = "generate_headings")]
#[command(about = "Generate synthetic compass/GPS recordings for replay")]
struct Args {
    /// TOML scenario file; command line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output recording (JSON lines)
    #[arg(short, long, default_value = "data/synthetic/headings.jsonl")]
    output: PathBuf,

    /// Rotation profile
    #[arg(short, long, value_enum)]
    profile: Option<Profile>,

    /// Steady heading, turn start or sweep center in degrees
    #[arg(long, default_value_t = 0.0)]
    heading: f64,

    /// Turn rate in degrees per second
    #[arg(long, default_value_t = 30.0)]
    rate: f64,

    /// Sweep amplitude in degrees
    #[arg(long, default_value_t = 45.0)]
    amplitude: f64,

    /// Sweep period in seconds
    #[arg(long, default_value_t = 8.0)]
    period: f64,

    /// Recording duration in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Compass sample interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Gaussian jitter std in degrees (CLI override)
    #[arg(long)]
    jitter: Option<f64>,

    /// Probability of an outlier spike per sample (CLI override)
    #[arg(long)]
    spike_rate: Option<f64>,

    /// Probability of a dropout per sample (CLI override)
    #[arg(long)]
    dropout_rate: Option<f64>,

    /// Record magnetometer vectors instead of headings
    #[arg(long)]
    vectors: bool,

    /// Add GPS fixes along a track driven in the device's direction
    #[arg(long)]
    gps: bool,

    /// Include course over ground in GPS fixes
    #[arg(long)]
    course: bool,

    /// Also write the true headings as CSV next to the recording
    #[arg(long)]
    truth: bool,
}

fn load_scenario(path: &PathBuf) -> Result<Scenario> {
    let content = fs::read_to_string(path).context("Failed to read scenario file")?;
    toml::from_str(&content).context("Failed to parse scenario file")
}

fn build_scenario(base: Scenario, args: &Args) -> Scenario {
    let mut scenario = base;

    if let Some(profile) = args.profile {
        scenario.profile = match profile {
            Profile::Steady => RotationProfile::Steady {
                heading: args.heading,
            },
            Profile::Turn => RotationProfile::Turn {
                start: args.heading,
                rate_degrees_per_sec: args.rate,
            },
            Profile::Sweep => RotationProfile::Sweep {
                center: args.heading,
                amplitude: args.amplitude,
                period_sec: args.period,
            },
        };
    }
    if let Some(duration) = args.duration {
        scenario.duration_sec = duration;
    }
    if let Some(interval) = args.interval_ms {
        scenario.sample_interval_ms = interval;
    }

    let mut noise = scenario.noise.clone();
    if let Some(seed) = args.seed {
        noise = noise.with_seed(seed);
    }
    if let Some(jitter) = args.jitter {
        noise = noise.with_jitter(jitter);
    }
    if let Some(rate) = args.spike_rate {
        noise = noise.with_spikes(rate, 90.0, 180.0);
    }
    if let Some(rate) = args.dropout_rate {
        noise = noise.with_dropouts(rate);
    }
    scenario.noise = noise;

    scenario.vector_readings |= args.vectors;
    if args.gps && scenario.gps.is_none() {
        scenario.gps = Some(GpsTrack::default());
    }
    if let Some(track) = scenario.gps.as_mut() {
        track.report_course |= args.course;
    }
    scenario
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base = match args.config {
        Some(ref path) => load_scenario(path)?,
        None => Scenario::default(),
    };
    let scenario = build_scenario(base, &args);

    if let Some(dir) = args.output.parent() {
        fs::create_dir_all(dir).context("Failed to create output directory")?;
    }

    let generated = generate_recording(&scenario);
    generated
        .recording
        .save(&args.output)
        .context("Failed to write recording")?;

    if args.truth {
        let truth_path = args.output.with_extension("truth.csv");
        let mut csv = String::from("t_ms,heading\n");
        for (t_ms, heading) in &generated.truth {
            csv.push_str(&format!("{},{:.3}\n", t_ms, heading));
        }
        fs::write(&truth_path, csv).context("Failed to write truth file")?;
        eprintln!("Truth written to: {}", truth_path.display());
    }

    eprintln!(
        "Generated {} records ({} compass samples, {:.1} s) in {}",
        generated.recording.records.len(),
        generated.recording.heading_count(),
        generated.recording.duration().as_secs_f64(),
        args.output.display()
    );
    Ok(())
}
