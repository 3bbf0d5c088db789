mod analysis;
mod biomechanics;
mod error;
mod feedback;
mod form_metrics;
mod keyframes;
mod mock_pose;
mod phases;
mod pose;
mod pro_model;
mod service_client;
mod smoothing;
mod source;
mod trajectory;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use analysis::{AnalysisConfig, AnalysisReport, ThrowAnalyzer};
use feedback::SkillLevel;
use keyframes::KeyframeKind;
use mock_pose::MockPoseSource;
use pose::Handedness;
use pro_model::{best_match, compare, Comparison, ProModel};
use service_client::AnalysisServiceClient;
use source::{JsonLinesSource, LandmarkSource, PoseExtractor};
use trajectory::{DiscPosition, SpeedEstimator};

#[derive(Parser, Debug)]
#[command(name = "discform-rs")]
#[command(about = "Disc golf throw form analysis (Rust)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one throw and print metrics, keyframes and coaching feedback
    Analyze {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        options: AnalysisArgs,
        /// Show landmark source info and exit
        #[arg(short, long)]
        info: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Also save the throw's form profile to this file
        #[arg(long)]
        save_profile: Option<PathBuf>,
    },

    /// Build a reference model from a pro's throw
    BuildModel {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        options: AnalysisArgs,
        /// Pro player name
        #[arg(long)]
        pro: String,
        /// Throw type (e.g. backhand, forehand)
        #[arg(long = "type", default_value = "backhand")]
        throw_type: String,
        /// Model library root
        #[arg(long, default_value = "data/pro_models")]
        models_dir: PathBuf,
    },

    /// Compare a throw against one model, or find the best match in a library
    Compare {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        options: AnalysisArgs,
        /// Saved user profile to compare instead of analysing a throw
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Model to compare with (default: best match under --models-dir)
        #[arg(long)]
        model: Option<PathBuf>,
        /// Model library root
        #[arg(long, default_value = "data/pro_models")]
        models_dir: PathBuf,
    },

    /// Print a summary of a saved model or profile
    Summary {
        /// Model file
        model: PathBuf,
    },

    /// Check that a remote analysis service is up
    Health {
        #[command(flatten)]
        service: ServiceArgs,
    },

    /// Send a video to a remote analysis service
    Remote {
        /// Video file to upload
        video: PathBuf,
        #[command(flatten)]
        service: ServiceArgs,
        #[command(flatten)]
        options: AnalysisArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Landmark file from the pose detector (JSON lines)
    #[arg(short = 'f', long)]
    input: Option<PathBuf>,

    /// Use a synthetic throw (for testing without a pose detector)
    #[arg(short, long)]
    mock: bool,

    /// Seed for the synthetic throw
    #[arg(long, default_value = "42")]
    mock_seed: u64,

    /// Frames in the synthetic throw
    #[arg(long, default_value = "120")]
    mock_frames: u32,

    /// Landmark noise of the synthetic throw (normalized units)
    #[arg(long, default_value = "0.004")]
    mock_jitter: f64,

    /// Probability that a synthetic frame has no body detected
    #[arg(long, default_value = "0.0")]
    mock_dropout: f64,

    /// Disc positions from the disc detector (JSON array of {x, y, frame})
    #[arg(long)]
    disc: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    /// Throwing hand: left or right
    #[arg(long, default_value = "right")]
    handedness: String,

    /// Skill level: beginner, intermediate or advanced
    #[arg(long, default_value = "intermediate")]
    skill_level: String,

    /// Minimum landmark visibility
    #[arg(long, default_value = "0.5")]
    min_confidence: f64,

    /// Stop after this many frames
    #[arg(long, default_value = "300")]
    max_frames: usize,

    /// Keep every Nth frame
    #[arg(long, default_value = "2")]
    sample_rate: usize,

    /// Frame rate to assume when the source does not report one
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Pixels per metre for disc speed
    #[arg(long)]
    px_per_m: Option<f64>,

    /// Apparent disc diameter in pixels, used for calibration when --px-per-m is not given
    #[arg(long)]
    disc_width_px: Option<f64>,
}

impl AnalysisArgs {
    fn config(&self) -> AnalysisConfig {
        AnalysisConfig::default()
            .with_handedness(Handedness::parse_lenient(&self.handedness))
            .with_skill_level(SkillLevel::parse_lenient(&self.skill_level))
            .with_min_confidence(self.min_confidence)
            .with_max_frames(self.max_frames)
            .with_sample_rate(self.sample_rate)
            .with_fps(self.fps)
            .with_calibration(self.px_per_m.or_else(|| {
                self.disc_width_px
                    .and_then(|w| SpeedEstimator::from_disc_width(w).px_per_m())
            }))
    }
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Analysis service host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Analysis service port
    #[arg(long, default_value = "5001")]
    port: u16,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,
}

impl ServiceArgs {
    fn client(&self) -> AnalysisServiceClient {
        AnalysisServiceClient::new(&self.host, self.port).with_timeout(self.timeout)
    }
}

fn banner(title: &str, detail: &str) {
    println!("{}", "=".repeat(50));
    println!("  {}", title);
    if !detail.is_empty() {
        println!("  {}", detail);
    }
    println!("{}", "=".repeat(50));
    println!();
}

fn load_disc_track(path: &Path) -> Result<Vec<DiscPosition>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read disc track {}", path.display()))?;
    let track: Vec<DiscPosition> = serde_json::from_str(&json)
        .with_context(|| format!("Invalid disc track {}", path.display()))?;
    log::info!("[TRAJECTORY] Loaded {} disc positions", track.len());
    Ok(track)
}

/// Landmark source and disc track for the chosen input.
fn open_input(input: &InputArgs, fps: f64) -> Result<(Box<dyn LandmarkSource>, Vec<DiscPosition>)> {
    let supplied_track = input.disc.as_deref().map(load_disc_track).transpose()?;

    if input.mock {
        let source = MockPoseSource::new(input.mock_seed, input.mock_frames)
            .with_jitter(input.mock_jitter)
            .with_dropout(input.mock_dropout)
            .with_fps(fps);
        let track = supplied_track.unwrap_or_else(|| source.disc_track());
        return Ok((Box::new(source), track));
    }

    let path = input
        .input
        .as_ref()
        .context("No landmark file given (use --input or --mock)")?;
    let source = JsonLinesSource::new(path).with_fps(fps);
    Ok((Box::new(source), supplied_track.unwrap_or_default()))
}

/// Stop flag raised by Ctrl+C so a long extraction returns what it has.
fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })?;
    Ok(stop)
}

fn print_source_info(source: Box<dyn LandmarkSource>, config: &AnalysisConfig) -> Result<()> {
    let extractor = PoseExtractor::new(source, config.extractor_config())
        .context("Failed to open landmark source")?;

    println!("Landmark Source:");
    println!("  available: {}", extractor.is_available());
    println!("  fps: {:.1}", extractor.fps());
    let mut info: Vec<_> = extractor.info().into_iter().collect();
    info.sort();
    for (key, value) in info {
        println!("  {}: {}", key, value);
    }
    extractor.close();
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    if report.is_error() {
        println!("ERROR: {}", report.error.as_deref().unwrap_or_default());
        println!();
    }

    println!("Pose detected: {}", if report.pose.detected { "yes" } else { "no" });
    if !report.pose.keyframes.is_empty() {
        println!("Keyframes:");
        for kind in [
            KeyframeKind::Setup,
            KeyframeKind::Reachback,
            KeyframeKind::Release,
            KeyframeKind::FollowThrough,
        ] {
            match report.pose.keyframes.get(&kind) {
                Some(frame) => println!("  {:<15} frame {}", kind.label(), frame),
                None => println!("  {:<15} not detected", kind.label()),
            }
        }
    }

    if let Some(m) = &report.pose.metrics {
        println!();
        println!("Biomechanics:");
        println!("  Reachback depth:     {:>5}/100", m.reachback_depth_score);
        println!("  Hip rotation:        {:>5.1}°", m.hip_rotation_degrees);
        println!("  Shoulder separation: {:>5.1}°", m.shoulder_separation_degrees);
        println!("  Follow-through:      {:>5}/100", m.follow_through_score);
        println!("  Weight shift:        {:>5}/100", m.weight_shift_score);
        if let Some(timing) = m.hip_shoulder_timing_ms {
            println!("  Hip-shoulder timing: {:>5.0} ms", timing);
        }
    }

    let t = &report.trajectory;
    println!();
    println!("Trajectory: {:?}", t.flight_path);
    println!("  Distance:      {:.0} px", t.distance);
    println!("  Max height:    {:.0} px", t.max_height);
    println!("  Release angle: {:.1}°", t.release_angle);
    if let Some(speed) = &t.release_speed {
        println!(
            "  Release speed: {:.1} mph ({:.1} km/h) at frame {}",
            speed.miles_per_hour, speed.kilometers_per_hour, speed.release_frame
        );
    }

    let f = &report.feedback;
    println!();
    println!("Overall score: {}/100", f.overall_score);
    println!("Priority focus: {}", f.priority_focus.as_str());
    println!("Strengths:");
    for strength in &f.strengths {
        println!("  + {}", strength);
    }
    println!("Tips:");
    for tip in report.combined_tips() {
        println!("  - {}", tip);
    }
    println!();
    println!("Processed in {} ms", report.processing_time_ms);
}

fn print_comparison(title: &str, comparison: &Comparison) {
    println!("{}", "=".repeat(50));
    println!("  {}", title);
    println!("{}", "=".repeat(50));
    print!("{}", comparison);
}

fn run_analyze(
    input: InputArgs,
    options: AnalysisArgs,
    info: bool,
    json: bool,
    save_profile: Option<PathBuf>,
) -> Result<()> {
    let config = options.config();
    let (source, track) = open_input(&input, config.fps)?;

    if info {
        return print_source_info(source, &config);
    }

    let stop = install_stop_flag()?;
    let analyzer = ThrowAnalyzer::new(config);

    if let Some(path) = save_profile {
        let (report, profile) = analyzer.analyze_with_profile(source, &track, Some(&*stop))?;
        match profile {
            Some(profile) => {
                profile
                    .save(&path)
                    .with_context(|| format!("Failed to save profile to {}", path.display()))?;
                println!("Saved throw profile to {}", path.display());
                println!();
            }
            None => log::warn!("[ANALYSIS] Extraction failed, no profile saved to {}", path.display()),
        }
        return emit_report(&report, json);
    }

    let report = analyzer.analyze(source, &track, Some(&*stop))?;
    emit_report(&report, json)
}

fn emit_report(report: &AnalysisReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report);
    }
    Ok(())
}

fn run_build_model(
    input: InputArgs,
    options: AnalysisArgs,
    pro: String,
    throw_type: String,
    models_dir: PathBuf,
) -> Result<()> {
    let analyzer = ThrowAnalyzer::new(options.config());
    let (source, track) = open_input(&input, analyzer.config().fps)?;
    let stop = install_stop_flag()?;

    log::info!("[MODEL] Analysing {} form for {}", throw_type, pro);
    let profile = analyzer.profile_source(source, &track, Some(&*stop))?;
    let model = profile.into_reference(&pro, &throw_type);

    let path = ProModel::library_path(&models_dir, &pro, &throw_type);
    model
        .save(&path)
        .with_context(|| format!("Failed to save model to {}", path.display()))?;

    println!("Created model at {}", path.display());
    println!();
    print!("{}", model.summary());
    Ok(())
}

fn run_compare(
    input: InputArgs,
    options: AnalysisArgs,
    profile: Option<PathBuf>,
    model: Option<PathBuf>,
    models_dir: PathBuf,
) -> Result<()> {
    let user = match profile {
        Some(path) => ProModel::load(&path)
            .with_context(|| format!("Failed to load profile {}", path.display()))?,
        None => {
            let analyzer = ThrowAnalyzer::new(options.config());
            let (source, track) = open_input(&input, analyzer.config().fps)?;
            let stop = install_stop_flag()?;
            analyzer.profile_source(source, &track, Some(&*stop))?
        }
    };

    match model {
        Some(path) => {
            let reference = ProModel::load(&path)
                .with_context(|| format!("Failed to load model {}", path.display()))?;
            print_comparison("Comparison Results", &compare(&user.metrics, &reference));
        }
        None => match best_match(&user.metrics, &models_dir)
            .with_context(|| format!("Failed to search models in {}", models_dir.display()))?
        {
            Some((path, comparison)) => {
                print_comparison("Best Match", &comparison);
                println!();
                println!("Model: {}", path.display());
            }
            None => println!("No models found under {}", models_dir.display()),
        },
    }
    Ok(())
}

fn run_remote(video: PathBuf, service: ServiceArgs, options: AnalysisArgs, json: bool) -> Result<()> {
    let client = service.client();
    let config = options.config();
    let report = tokio::runtime::Runtime::new()?
        .block_on(client.analyze_pose(&video, &config))
        .with_context(|| format!("Remote analysis of {} failed", video.display()))?;
    emit_report(&report, json)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Analyze {
            input,
            options,
            info,
            json,
            save_profile,
        } => {
            if !json {
                banner(
                    "DiscForm - Throw Analysis (Rust)",
                    if input.mock { "Using MOCK pose source (Simulation Mode)" } else { "" },
                );
            }
            run_analyze(input, options, info, json, save_profile)
        }
        Command::BuildModel {
            input,
            options,
            pro,
            throw_type,
            models_dir,
        } => {
            banner("DiscForm - Pro Model Builder", "");
            run_build_model(input, options, pro, throw_type, models_dir)
        }
        Command::Compare {
            input,
            options,
            profile,
            model,
            models_dir,
        } => run_compare(input, options, profile, model, models_dir),
        Command::Summary { model } => {
            let loaded = ProModel::load(&model)
                .with_context(|| format!("Failed to load model {}", model.display()))?;
            let kind = if loaded.is_reference() { "Pro reference model" } else { "User throw profile" };
            banner("DiscForm - Model Summary", kind);
            print!("{}", loaded.summary());
            Ok(())
        }
        Command::Health { service } => {
            let client = service.client();
            let health = tokio::runtime::Runtime::new()?
                .block_on(client.health())
                .with_context(|| format!("Analysis service at {}:{} unreachable", service.host, service.port))?;
            println!("Analysis service: {}", health.status);
            Ok(())
        }
        Command::Remote {
            video,
            service,
            options,
            json,
        } => run_remote(video, service, options, json),
    }
}
