use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use physio_pose::admission::{AdmissionController, AdmissionMode};
use physio_pose::camera::{PixelLayout, StreamFrameSource};
use physio_pose::config::Config;
use physio_pose::error::DetectorError;
use physio_pose::pipeline::{FrameOutcome, PollOutcome, PoseResult, PosePipeline};
use physio_pose::pose::{
    CoordinateSpace, DetectorHandle, EstimatorLoader, KeypointIndex, OutputScale, PoseEstimator, RawKeypoint,
};

/// Pixel-space estimator: arm held straight out to the side.
struct SideArm {
    score: f32,
}

impl PoseEstimator for SideArm {
    fn estimate(&mut self, input: Array4<f32>) -> Result<Vec<RawKeypoint>, DetectorError> {
        let t = input.shape()[1] as f32;
        Ok(KeypointIndex::ALL
            .iter()
            .map(|&index| {
                let (x, y) = match index {
                    KeypointIndex::LeftHip => (0.5 * t, 0.8 * t),
                    KeypointIndex::LeftShoulder => (0.5 * t, 0.4 * t),
                    KeypointIndex::LeftElbow => (0.75 * t, 0.4 * t),
                    KeypointIndex::LeftWrist => (t, 0.4 * t),
                    _ => (0.5 * t, 0.5 * t),
                };
                let score = if index == KeypointIndex::LeftElbow { self.score } else { 0.9 };
                RawKeypoint { index, x, y, score }
            })
            .collect())
    }

    fn output_scale(&self) -> OutputScale {
        OutputScale::Auto
    }
}

fn loader(calls: Arc<AtomicUsize>, elbow_score: f32) -> impl EstimatorLoader + 'static {
    move || -> Result<Box<dyn PoseEstimator>, DetectorError> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SideArm { score: elbow_score }))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.detector.target_size = 32;
    config.pipeline.stats_interval_ms = 0;
    config
}

fn rgba(width: u32, height: u32) -> Vec<u8> {
    vec![200; (width * height * 4) as usize]
}

#[test]
fn frames_before_initialize_do_not_stop_the_pipeline() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = config();
    let detector = Arc::new(DetectorHandle::new(loader(calls.clone(), 0.9), 0.1));
    let gate = Arc::new(AdmissionController::new(AdmissionMode::Stride(1)));
    let (mut source, feeder) = StreamFrameSource::new(Arc::clone(&gate));
    let mut pipeline = PosePipeline::new(&config, Arc::clone(&detector), gate);
    let (tx, rx) = mpsc::channel::<PoseResult>();
    let mut sink = tx;

    assert!(feeder.push_raw(rgba(64, 48), 64, 48, PixelLayout::Rgba));
    assert_eq!(pipeline.poll_once(&mut source, &mut sink), PollOutcome::Failed(physio_pose::pipeline::FrameStage::Detecting));
    assert!(rx.try_recv().is_err());

    detector.initialize().unwrap();
    assert!(feeder.push_raw(rgba(64, 48), 64, 48, PixelLayout::Rgba));
    assert_eq!(pipeline.poll_once(&mut source, &mut sink), PollOutcome::Published(FrameOutcome::Detected));

    let result = rx.try_recv().unwrap();
    assert_eq!(result.sequence, 1);
    let pose = result.pose.as_ref().unwrap();
    assert_eq!(pose.space(), CoordinateSpace::Source);
    // model (16, 12.8) -> source (32, 19.2) for a 64x48 frame
    let shoulder = pose.get(KeypointIndex::LeftShoulder);
    assert!((shoulder.x - 32.0).abs() < 1e-3);
    assert!((shoulder.y - 19.2).abs() < 1e-3);
    assert!((result.angles.left.unwrap() - 90.0).abs() < 1e-2);
    assert!((result.elbow_angles.left.unwrap() - 180.0).abs() < 1e-2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn low_confidence_elbow_publishes_none_angle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = config();
    let detector = Arc::new(DetectorHandle::new(loader(calls, 0.05), 0.1));
    detector.initialize().unwrap();
    let gate = Arc::new(AdmissionController::new(AdmissionMode::Stride(1)));
    let (mut source, feeder) = StreamFrameSource::new(Arc::clone(&gate));
    let mut pipeline = PosePipeline::new(&config, detector, gate);

    let mut results = Vec::new();
    let mut sink = |r: &PoseResult| results.push(r.clone());
    assert!(feeder.push_raw(rgba(40, 40), 40, 40, PixelLayout::Rgba));
    pipeline.poll_once(&mut source, &mut sink);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].angles.left, None);
    assert!(results[0].pose.is_some());
}

#[test]
fn burst_of_frames_keeps_one_in_flight() {
    const FRAMES: usize = 200;
    let calls = Arc::new(AtomicUsize::new(0));
    let config = config();
    let detector = Arc::new(DetectorHandle::new(loader(calls, 0.9), 0.1));
    detector.initialize().unwrap();
    let gate = Arc::new(AdmissionController::new(AdmissionMode::Stride(1)));
    let (mut source, feeder) = StreamFrameSource::new(Arc::clone(&gate));
    let mut pipeline = PosePipeline::new(&config, detector, Arc::clone(&gate));

    let producer = thread::spawn(move || {
        let mut admitted = 0;
        for _ in 0..FRAMES {
            if feeder.push_raw(rgba(48, 32), 48, 32, PixelLayout::Rgba) {
                admitted += 1;
            }
            thread::sleep(Duration::from_micros(200));
        }
        admitted
    });

    let mut published = Vec::new();
    let mut sink = |r: &PoseResult| published.push(r.sequence);
    while !producer.is_finished() {
        if let PollOutcome::Idle = pipeline.poll_once(&mut source, &mut sink) {
            thread::sleep(Duration::from_micros(100));
        }
    }
    // drain the frame admitted last, if any
    pipeline.poll_once(&mut source, &mut sink);
    let admitted = producer.join().unwrap();

    let stats = gate.stats();
    assert_eq!(stats.arrivals, FRAMES as u64);
    assert_eq!(stats.admitted, admitted);
    assert_eq!(stats.completed, admitted);
    assert!(stats.completed <= FRAMES as u64);
    assert_eq!(published.len() as u64, admitted);
    // admission order is publish order
    assert!(published.windows(2).all(|w| w[0] < w[1]));
    assert!(!gate.is_in_flight());
}
