use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use physio_pose::admission::{AdmissionController, AdmissionMode};
use physio_pose::analysis::RangeOfMotion;
use physio_pose::camera::{OpenCvCamera, StreamFrameSource};
use physio_pose::config::Config;
use physio_pose::pipeline::{PoseResult, PosePipeline};
use physio_pose::pose::{DetectorHandle, OnnxLoader, Side};

/// Live shoulder assessment from a webcam
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, default_value = "physio_pose.toml")]
    config: PathBuf,

    /// Camera index (overrides [camera].index)
    #[arg(long)]
    camera: Option<i32>,

    /// Process every n-th camera frame (overrides [admission].stride)
    #[arg(long)]
    stride: Option<u32>,

    /// Stop after this many seconds (runs until killed otherwise)
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = Config::load_or_default(&args.config);
    if let Some(index) = args.camera {
        config.camera.index = index;
    }
    if let Some(stride) = args.stride {
        config.admission.stride = stride;
    }

    println!("=== Physio Pose Live {} ({}) ===", env!("CARGO_PKG_VERSION"), env!("GIT_VERSION"));

    let detector = Arc::new(DetectorHandle::new(
        OnnxLoader::new(config.detector.clone()),
        config.detector.min_pose_score,
    ));
    // カメラは推論準備を待たずに起動し、準備前のフレームは捨てる
    let init = detector
        .initialize_in_background()
        .context("failed to spawn detector initialization")?;

    // ストリームは stride で間引く
    let gate = Arc::new(AdmissionController::new(AdmissionMode::Stride(config.admission.stride.max(1))));
    let (mut source, feeder) = StreamFrameSource::new(Arc::clone(&gate));
    let mut pipeline = PosePipeline::new(&config, Arc::clone(&detector), gate);

    let camera = OpenCvCamera::open(&config.camera)?;
    let (width, height) = camera.resolution();
    println!("Camera: {}x{}", width, height);

    let shutdown = Arc::new(AtomicBool::new(false));
    let camera_thread = camera
        .spawn_stream(feeder, Arc::clone(&shutdown))
        .context("failed to spawn camera thread")?;

    if let Some(seconds) = args.seconds {
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    let visibility = config.angles.visibility_threshold;
    let mut rom = RangeOfMotion::new();
    let mut sink = |result: &PoseResult| {
        rom.record(&result.angles);
        let fmt = |a: Option<f32>| a.map_or_else(|| "--".to_string(), |v| format!("{:.1}", v));
        tracing::debug!(
            sequence = result.sequence,
            left = %fmt(result.angles.left),
            right = %fmt(result.angles.right),
            latency_ms = result.latency.as_millis() as u64,
            segments = result.overlay_segments(visibility).len(),
            "shoulder angles"
        );
    };
    pipeline.run(&mut source, &mut sink, &shutdown);

    shutdown.store(true, Ordering::Relaxed);
    if camera_thread.join().is_err() {
        tracing::warn!("camera thread panicked");
    }
    if let Ok(Err(e)) = init.join() {
        println!("Detector failed to start: {}", e);
    }

    println!("Range of motion:");
    for side in Side::BOTH {
        match rom.span(side) {
            Some(span) => println!(
                "  {:<5} {:.1}° - {:.1}° (span {:.1}°)",
                side.label(),
                rom.min(side).unwrap_or_default(),
                rom.max(side).unwrap_or_default(),
                span
            ),
            None => println!("  {:<5} no confident samples", side.label()),
        }
    }
    detector.dispose();
    Ok(())
}
