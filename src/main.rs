use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use physio_pose::admission::{AdmissionController, AdmissionMode};
use physio_pose::analysis::{analyze_movement, MovementDirection, RangeOfMotion};
use physio_pose::angles::ShoulderAngles;
use physio_pose::camera::{ImageFileCamera, StillCaptureSource};
use physio_pose::config::Config;
use physio_pose::pipeline::{PollOutcome, PoseResult, PosePipeline};
use physio_pose::pose::{DetectorHandle, OnnxLoader, Side};

/// Shoulder angle assessment on still captures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, default_value = "physio_pose.toml")]
    config: PathBuf,

    /// Path to ONNX model file (overrides [detector].model_path)
    #[arg(short, long)]
    model: Option<String>,

    /// Capture interval in milliseconds (overrides [admission].interval_ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Enable keypoint smoothing
    #[arg(long)]
    smooth: bool,

    /// Cycle through the images until interrupted
    #[arg(long)]
    repeat: bool,

    /// Still images, processed in order as if captured by the camera
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config);
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    if let Some(ms) = args.interval_ms {
        config.admission.interval_ms = ms;
    }
    config.smoothing.enabled |= args.smooth;

    println!("=== Physio Pose {} ({}) ===", env!("CARGO_PKG_VERSION"), env!("GIT_VERSION"));
    println!("Model: {}", config.detector.model_path);
    println!("Images: {}", args.images.len());
    println!();

    let detector = Arc::new(DetectorHandle::new(
        OnnxLoader::new(config.detector.clone()),
        config.detector.min_pose_score,
    ));
    let init = detector
        .initialize_in_background()
        .context("failed to spawn detector initialization")?;

    // 静止画キャプチャは常にポーリング (interval) で採用する
    let mode = match config.admission.to_mode() {
        mode @ AdmissionMode::Interval(_) => mode,
        AdmissionMode::Stride(_) => {
            tracing::warn!("stride admission needs a streaming source; using interval mode");
            AdmissionMode::Interval(Duration::from_millis(config.admission.interval_ms))
        }
    };
    let gate = Arc::new(AdmissionController::new(mode));
    let mut pipeline = PosePipeline::new(&config, Arc::clone(&detector), gate);
    let mut source = StillCaptureSource::new(ImageFileCamera::new(args.images, args.repeat));

    match init.join() {
        Ok(result) => result.context("pose detector initialization failed")?,
        Err(_) => anyhow::bail!("detector initialization thread panicked"),
    }

    let threshold = config.angles.movement_threshold_deg;
    let mut previous = ShoulderAngles::default();
    let mut rom = RangeOfMotion::new();
    let mut sink = |result: &PoseResult| {
        print_result(result);
        for side in Side::BOTH {
            if let Some(m) = analyze_movement(result.angles.get(side), previous.get(side), side, threshold) {
                if m.direction != MovementDirection::Steady {
                    println!("  {} shoulder {:?} ({:.1}°)", side.label(), m.direction, m.step);
                }
            }
        }
        rom.record(&result.angles);
        previous = result.angles;
    };

    let idle = Duration::from_millis(config.pipeline.idle_poll_ms.max(1));
    while !source.camera().is_exhausted() {
        match pipeline.poll_once(&mut source, &mut sink) {
            PollOutcome::Skipped | PollOutcome::Idle => std::thread::sleep(idle),
            PollOutcome::Published(_) | PollOutcome::Failed(_) => {}
        }
    }

    println!();
    println!("Range of motion:");
    for side in Side::BOTH {
        match (rom.min(side), rom.max(side)) {
            (Some(min), Some(max)) => println!(
                "  {:<5} {:.1}° - {:.1}° (span {:.1}°, {} samples)",
                side.label(),
                min,
                max,
                max - min,
                rom.samples(side)
            ),
            _ => println!("  {:<5} no confident samples", side.label()),
        }
    }

    let counters = pipeline.counters();
    println!("Frames: {} published, {} without pose, {} failed", counters.published, counters.no_pose, counters.failed);
    detector.dispose();
    Ok(())
}

fn print_result(result: &PoseResult) {
    let fmt = |a: Option<f32>| a.map_or_else(|| "--".to_string(), |v| format!("{:.1}°", v));
    match &result.pose {
        Some(pose) => println!(
            "#{:<4} score {:.2}  shoulder L {:>7} R {:>7}  elbow L {:>7} R {:>7}  ({} ms)",
            result.sequence,
            pose.overall_score(),
            fmt(result.angles.left),
            fmt(result.angles.right),
            fmt(result.elbow_angles.left),
            fmt(result.elbow_angles.right),
            result.latency.as_millis()
        ),
        None => println!("#{:<4} no pose detected", result.sequence),
    }
}
