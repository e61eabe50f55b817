//! Frame-to-angle orchestration: admit, preprocess, detect, map, compute
//! angles, publish.
//!
//! Exactly one admitted frame is processed at a time and every exit path
//! (success, `NoPose`, failure, panic) releases the admission gate through an
//! [`AdmissionPermit`](crate::admission::AdmissionPermit). A failed frame
//! publishes nothing, so the last published result stays current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::admission::AdmissionController;
use crate::angles::{elbow_angles, shoulder_angles, ElbowAngles, ShoulderAngles};
use crate::camera::{FrameSource, FrameTask, SourceAdmission};
use crate::config::Config;
use crate::error::{DetectorError, FrameError};
use crate::pose::skeleton::visible_segments;
use crate::pose::{
    CoordinateMapper, CoordinateSpace, DetectorHandle, Keypoint, LifecycleState, Pose, Preprocessor, ScaleFactors,
};
use crate::tracker::KeypointSmoother;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Admitted,
    Preprocessing,
    Detecting,
    Mapping,
    AngleComputing,
    Published,
}

/// One published frame. `pose` is in source-frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseResult {
    pub sequence: u64,
    pub pose: Option<Pose>,
    pub angles: ShoulderAngles,
    pub elbow_angles: ElbowAngles,
    /// Source to display ratio, for overlays.
    pub display_scale: ScaleFactors,
    /// Capture to publish.
    pub latency: Duration,
}

impl PoseResult {
    /// The pose in display pixels.
    pub fn display_pose(&self) -> Option<Pose> {
        let scale = self.display_scale;
        self.pose
            .as_ref()
            .map(|p| p.map_positions(CoordinateSpace::Display, |kp| (kp.x * scale.x, kp.y * scale.y)))
    }

    /// Skeleton lines to draw, in display pixels.
    pub fn overlay_segments(&self, visibility_threshold: f32) -> Vec<(Keypoint, Keypoint)> {
        self.display_pose()
            .map(|p| visible_segments(&p, visibility_threshold))
            .unwrap_or_default()
    }

    pub fn outcome(&self) -> FrameOutcome {
        if self.pose.is_some() {
            FrameOutcome::Detected
        } else {
            FrameOutcome::NoPose
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Detected,
    /// Completed without a pose; published with both angles `None`.
    NoPose,
}

/// Result of one [`PosePipeline::poll_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The gate rejected this tick.
    Skipped,
    /// Admitted, but the source had no frame.
    Idle,
    Published(FrameOutcome),
    Failed(FrameStage),
}

/// Where results go. Called once per completed frame, in admission order.
pub trait ResultSink {
    fn publish(&mut self, result: &PoseResult);
}

impl<F> ResultSink for F
where
    F: FnMut(&PoseResult),
{
    fn publish(&mut self, result: &PoseResult) {
        self(result)
    }
}

impl ResultSink for mpsc::Sender<PoseResult> {
    fn publish(&mut self, result: &PoseResult) {
        if self.send(result.clone()).is_err() {
            trace!(sequence = result.sequence, "result receiver gone");
        }
    }
}

/// Shared last-known result, for UI polling.
#[derive(Debug, Clone, Default)]
pub struct LatestResult {
    slot: Arc<Mutex<Option<PoseResult>>>,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<PoseResult> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ResultSink for LatestResult {
    fn publish(&mut self, result: &PoseResult) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(result.clone());
    }
}

/// Readiness as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Initializing,
    Ready,
    Error(String),
    Disposed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub published: u64,
    pub no_pose: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub reloads: u64,
}

pub struct PosePipeline {
    detector: Arc<DetectorHandle>,
    gate: Arc<AdmissionController>,
    preprocessor: Preprocessor,
    smoother: Option<KeypointSmoother>,
    display: Option<(u32, u32)>,
    confidence_threshold: f32,
    frame_timeout: Option<Duration>,
    timeout_reload_after: u32,
    consecutive_timeouts: u32,
    idle_poll: Duration,
    stats_interval: Duration,
    counters: PipelineCounters,
    window: StatsWindow,
}

struct StatsWindow {
    started: Instant,
    published: u64,
    admitted: u64,
    dropped: u64,
}

impl PosePipeline {
    pub fn new(config: &Config, detector: Arc<DetectorHandle>, gate: Arc<AdmissionController>) -> Self {
        let smoother = config
            .smoothing
            .enabled
            .then(|| KeypointSmoother::from_config(&config.smoothing, config.angles.confidence_threshold));
        Self {
            detector,
            gate,
            preprocessor: Preprocessor::new(config.detector.target_size, &config.preprocess),
            smoother,
            display: config.pipeline.display_size(),
            confidence_threshold: config.angles.confidence_threshold,
            frame_timeout: config.pipeline.frame_timeout(),
            timeout_reload_after: config.pipeline.timeout_reload_after,
            consecutive_timeouts: 0,
            idle_poll: Duration::from_millis(config.pipeline.idle_poll_ms.max(1)),
            stats_interval: Duration::from_millis(config.pipeline.stats_interval_ms),
            counters: PipelineCounters::default(),
            window: StatsWindow { started: Instant::now(), published: 0, admitted: 0, dropped: 0 },
        }
    }

    pub fn gate(&self) -> &Arc<AdmissionController> {
        &self.gate
    }

    pub fn detector(&self) -> &Arc<DetectorHandle> {
        &self.detector
    }

    pub fn counters(&self) -> PipelineCounters {
        self.counters
    }

    /// Overlay target size; `None` means the source resolution.
    pub fn set_display_size(&mut self, display: Option<(u32, u32)>) {
        self.display = display;
    }

    pub fn status(&self) -> PipelineStatus {
        match self.detector.state() {
            LifecycleState::Ready => PipelineStatus::Ready,
            LifecycleState::Disposed => PipelineStatus::Disposed,
            LifecycleState::Initializing => PipelineStatus::Initializing,
            LifecycleState::Uninitialized => match self.detector.last_error() {
                Some(e) => PipelineStatus::Error(e.to_string()),
                None => PipelineStatus::Initializing,
            },
        }
    }

    /// Run one already-admitted frame to completion.
    ///
    /// Does not touch the admission gate; callers hold the permit.
    pub fn process_frame(&mut self, task: FrameTask) -> Result<PoseResult, FrameError> {
        let started = Instant::now();
        let sequence = task.sequence;
        let captured_at = task.captured_at;
        trace!(sequence, stage = ?FrameStage::Admitted, "frame");

        trace!(sequence, stage = ?FrameStage::Preprocessing, "frame");
        let input = self.preprocessor.prepare(task)?;
        let geometry = input.geometry;

        trace!(sequence, stage = ?FrameStage::Detecting, "frame");
        let detected = self.detector.detect(input)?;

        trace!(sequence, stage = ?FrameStage::Mapping, "frame");
        let mapper = CoordinateMapper::new(geometry, self.display);
        let pose = detected.map(|p| mapper.map_pose(&p, CoordinateSpace::Source));
        let pose = match (pose, self.smoother.as_mut()) {
            (Some(p), Some(smoother)) => Some(smoother.apply(&p, captured_at)),
            (None, Some(smoother)) => {
                smoother.reset();
                None
            }
            (pose, None) => pose,
        };

        trace!(sequence, stage = ?FrameStage::AngleComputing, "frame");
        let (angles, elbows) = match &pose {
            Some(p) => (
                shoulder_angles(p, self.confidence_threshold),
                elbow_angles(p, self.confidence_threshold),
            ),
            None => (ShoulderAngles::default(), ElbowAngles::default()),
        };

        let elapsed = started.elapsed();
        if let Some(limit) = self.frame_timeout {
            if elapsed > limit {
                return Err(FrameError::Timeout {
                    sequence,
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: limit.as_millis() as u64,
                });
            }
        }

        Ok(PoseResult {
            sequence,
            pose,
            angles,
            elbow_angles: elbows,
            display_scale: mapper.display_scale(),
            latency: captured_at.elapsed(),
        })
    }

    /// Pull at most one frame from `source` and run it through.
    pub fn poll_once(&mut self, source: &mut dyn FrameSource, sink: &mut dyn ResultSink) -> PollOutcome {
        let gate = Arc::clone(&self.gate);
        let (task, _permit) = match source.admission() {
            SourceAdmission::OnTick => {
                let Some(permit) = gate.try_acquire() else {
                    return PollOutcome::Skipped;
                };
                match source.next_frame() {
                    Some(task) => (task, permit),
                    None => return PollOutcome::Idle,
                }
            }
            SourceAdmission::OnArrival => match source.next_frame() {
                Some(task) => (task, gate.completion_guard()),
                None => return PollOutcome::Idle,
            },
        };

        let sequence = task.sequence;
        match self.process_frame(task) {
            Ok(result) => {
                self.consecutive_timeouts = 0;
                sink.publish(&result);
                self.counters.published += 1;
                let outcome = result.outcome();
                if outcome == FrameOutcome::NoPose {
                    self.counters.no_pose += 1;
                }
                trace!(sequence, stage = ?FrameStage::Published, ?outcome, "frame");
                PollOutcome::Published(outcome)
            }
            Err(e) => {
                let stage = e.stage();
                self.counters.failed += 1;
                match &e {
                    FrameError::Detector(DetectorError::NotReady) => {
                        debug!(sequence, "detector not ready; frame dropped")
                    }
                    FrameError::Timeout { .. } => self.on_timeout(&e),
                    _ => warn!(sequence, ?stage, "frame failed: {}", e),
                }
                PollOutcome::Failed(stage)
            }
        }
    }

    fn on_timeout(&mut self, err: &FrameError) {
        self.counters.timeouts += 1;
        self.consecutive_timeouts += 1;
        warn!(consecutive = self.consecutive_timeouts, "{}", err);

        if self.timeout_reload_after > 0 && self.consecutive_timeouts >= self.timeout_reload_after {
            self.consecutive_timeouts = 0;
            self.counters.reloads += 1;
            if let Some(smoother) = self.smoother.as_mut() {
                smoother.reset();
            }
            match self.detector.reload() {
                Ok(()) => info!("detector reloaded after repeated timeouts"),
                Err(e) => warn!("detector reload failed: {}", e),
            }
        }
    }

    /// Poll until `shutdown` is set.
    pub fn run(&mut self, source: &mut dyn FrameSource, sink: &mut dyn ResultSink, shutdown: &AtomicBool) {
        info!(mode = ?self.gate.mode(), "pipeline started");
        self.window = StatsWindow { started: Instant::now(), published: 0, admitted: 0, dropped: 0 };

        while !shutdown.load(Ordering::Relaxed) {
            match self.poll_once(source, sink) {
                PollOutcome::Skipped | PollOutcome::Idle => thread::sleep(self.idle_poll),
                PollOutcome::Published(_) | PollOutcome::Failed(_) => {}
            }
            self.log_stats();
        }

        let stats = self.gate.stats();
        info!(
            arrivals = stats.arrivals,
            admitted = stats.admitted,
            dropped = stats.dropped,
            published = self.counters.published,
            failed = self.counters.failed,
            "pipeline stopped"
        );
    }

    fn log_stats(&mut self) {
        if self.stats_interval.is_zero() {
            return;
        }
        let elapsed = self.window.started.elapsed();
        if elapsed < self.stats_interval {
            return;
        }

        let stats = self.gate.stats();
        let published = self.counters.published - self.window.published;
        info!(
            "FPS: {:.1} (admitted: {} drop: {}) no_pose={} failed={} status={:?}",
            published as f32 / elapsed.as_secs_f32(),
            stats.admitted - self.window.admitted,
            stats.dropped - self.window.dropped,
            self.counters.no_pose,
            self.counters.failed,
            self.status(),
        );
        self.window = StatsWindow {
            started: Instant::now(),
            published: self.counters.published,
            admitted: stats.admitted,
            dropped: stats.dropped,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionMode;
    use crate::camera::{PixelLayout, StreamFrameSource};
    use crate::pose::{EstimatorLoader, KeypointIndex, OutputScale, PoseEstimator, RawKeypoint};
    use ndarray::Array4;

    /// Returns a raised left arm in normalized coordinates.
    struct ArmEstimator {
        delay: Duration,
    }

    impl PoseEstimator for ArmEstimator {
        fn estimate(&mut self, _input: Array4<f32>) -> Result<Vec<RawKeypoint>, DetectorError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(KeypointIndex::ALL
                .iter()
                .map(|&index| {
                    let (x, y) = match index {
                        KeypointIndex::LeftHip => (0.25, 0.5),
                        KeypointIndex::LeftShoulder => (0.25, 0.25),
                        KeypointIndex::LeftElbow => (0.5, 0.25),
                        _ => (0.5, 0.5),
                    };
                    RawKeypoint { index, x, y, score: 0.9 }
                })
                .collect())
        }

        fn output_scale(&self) -> OutputScale {
            OutputScale::Normalized
        }
    }

    fn loader(delay: Duration) -> impl EstimatorLoader + 'static {
        move || -> Result<Box<dyn PoseEstimator>, DetectorError> { Ok(Box::new(ArmEstimator { delay })) }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.detector.target_size = 8;
        config
    }

    fn pipeline(config: &Config, delay: Duration) -> PosePipeline {
        let detector = Arc::new(DetectorHandle::new(loader(delay), config.detector.min_pose_score));
        let gate = Arc::new(AdmissionController::new(AdmissionMode::Stride(1)));
        PosePipeline::new(config, detector, gate)
    }

    fn frame(sequence: u64, w: u32, h: u32) -> FrameTask {
        FrameTask::raw(sequence, w, h, PixelLayout::Rgb, vec![128; (w * h * 3) as usize])
    }

    #[test]
    fn test_process_frame_maps_to_source() {
        let config = config();
        let mut pipeline = pipeline(&config, Duration::ZERO);
        pipeline.detector().initialize().unwrap();

        let result = pipeline.process_frame(frame(7, 400, 200)).unwrap();
        assert_eq!(result.sequence, 7);
        let pose = result.pose.as_ref().unwrap();
        assert_eq!(pose.space(), CoordinateSpace::Source);
        let shoulder = pose.get(KeypointIndex::LeftShoulder);
        assert!((shoulder.x - 100.0).abs() < 1e-3);
        assert!((shoulder.y - 50.0).abs() < 1e-3);

        // hip (100,100), shoulder (100,50), elbow (200,50) -> 90°
        assert!((result.angles.left.unwrap() - 90.0).abs() < 1e-3);
        assert_eq!(result.angles.right, Some(0.0));
        assert_eq!(result.outcome(), FrameOutcome::Detected);
    }

    #[test]
    fn test_display_pose_scaling() {
        let mut config = config();
        config.pipeline.display_width = Some(800);
        config.pipeline.display_height = Some(400);
        let mut pipeline = pipeline(&config, Duration::ZERO);
        pipeline.detector().initialize().unwrap();

        let result = pipeline.process_frame(frame(0, 400, 200)).unwrap();
        assert_eq!(result.display_scale, ScaleFactors { x: 2.0, y: 2.0 });
        let display = result.display_pose().unwrap();
        assert_eq!(display.space(), CoordinateSpace::Display);
        assert!((display.get(KeypointIndex::LeftElbow).x - 400.0).abs() < 1e-3);

        // every keypoint scores 0.9, so all 16 skeleton lines are drawn
        let segments = result.overlay_segments(config.angles.visibility_threshold);
        assert_eq!(segments.len(), 16);
        assert!(result.overlay_segments(0.95).is_empty());
    }

    #[test]
    fn test_not_ready_frame_fails_and_gate_clears() {
        let config = config();
        let mut pipeline = pipeline(&config, Duration::ZERO);
        let (mut source, feeder) = StreamFrameSource::new(Arc::clone(pipeline.gate()));
        let mut published = Vec::new();
        let mut sink = |r: &PoseResult| published.push(r.sequence);

        assert!(feeder.offer(frame(1, 16, 16)));
        let outcome = pipeline.poll_once(&mut source, &mut sink);
        assert_eq!(outcome, PollOutcome::Failed(FrameStage::Detecting));
        assert!(!pipeline.gate().is_in_flight());
        assert_eq!(pipeline.status(), PipelineStatus::Initializing);

        pipeline.detector().initialize().unwrap();
        assert!(feeder.offer(frame(2, 16, 16)));
        let outcome = pipeline.poll_once(&mut source, &mut sink);
        assert_eq!(outcome, PollOutcome::Published(FrameOutcome::Detected));
        assert_eq!(published, vec![2]);
        assert_eq!(pipeline.status(), PipelineStatus::Ready);
    }

    #[test]
    fn test_failed_frame_keeps_last_result() {
        let config = config();
        let mut pipeline = pipeline(&config, Duration::ZERO);
        pipeline.detector().initialize().unwrap();
        let (mut source, feeder) = StreamFrameSource::new(Arc::clone(pipeline.gate()));
        let latest = LatestResult::new();
        let mut sink = latest.clone();

        assert!(feeder.offer(frame(1, 16, 16)));
        pipeline.poll_once(&mut source, &mut sink);
        assert_eq!(latest.get().unwrap().sequence, 1);

        // buffer too short for its geometry
        assert!(feeder.offer(FrameTask::raw(2, 16, 16, PixelLayout::Rgb, vec![0; 5])));
        let outcome = pipeline.poll_once(&mut source, &mut sink);
        assert_eq!(outcome, PollOutcome::Failed(FrameStage::Preprocessing));
        assert_eq!(latest.get().unwrap().sequence, 1);
        assert_eq!(pipeline.counters().failed, 1);
        assert!(!pipeline.gate().is_in_flight());
    }

    #[test]
    fn test_timeout_not_published_and_reloads() {
        let mut config = config();
        config.pipeline.frame_timeout_ms = 1;
        config.pipeline.timeout_reload_after = 2;
        let mut pipeline = pipeline(&config, Duration::from_millis(20));
        pipeline.detector().initialize().unwrap();
        let (mut source, feeder) = StreamFrameSource::new(Arc::clone(pipeline.gate()));
        let (tx, rx) = mpsc::channel::<PoseResult>();
        let mut sink = tx;

        for seq in 0..2 {
            assert!(feeder.offer(frame(seq, 16, 16)));
            assert_eq!(pipeline.poll_once(&mut source, &mut sink), PollOutcome::Failed(FrameStage::Published));
        }
        assert!(rx.try_recv().is_err());
        let counters = pipeline.counters();
        assert_eq!(counters.timeouts, 2);
        assert_eq!(counters.reloads, 1);
        assert!(pipeline.detector().is_ready());
    }

    #[test]
    fn test_interval_source_skips_between_ticks() {
        let mut config = config();
        config.admission.interval_ms = 60_000;
        let detector = Arc::new(DetectorHandle::new(loader(Duration::ZERO), 0.1));
        detector.initialize().unwrap();
        let gate = Arc::new(AdmissionController::new(config.admission.to_mode()));
        let mut pipeline = PosePipeline::new(&config, detector, gate);

        let mut captures = 0;
        let mut source = crate::camera::StillCaptureSource::new(|| -> anyhow::Result<crate::camera::StillImage> {
            captures += 1;
            let img = image::RgbImage::from_pixel(32, 24, image::Rgb([90, 90, 90]));
            let mut bytes = Vec::new();
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
            Ok(crate::camera::StillImage { width: 32, height: 24, bytes })
        });
        let mut sink = |_: &PoseResult| {};

        assert_eq!(pipeline.poll_once(&mut source, &mut sink), PollOutcome::Published(FrameOutcome::Detected));
        assert_eq!(pipeline.poll_once(&mut source, &mut sink), PollOutcome::Skipped);
        drop(source);
        assert_eq!(captures, 1);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let config = config();
        let mut pipeline = pipeline(&config, Duration::ZERO);
        pipeline.detector().initialize().unwrap();
        let (mut source, _feeder) = StreamFrameSource::new(Arc::clone(pipeline.gate()));
        let shutdown = AtomicBool::new(true);
        let mut sink = |_: &PoseResult| {};
        pipeline.run(&mut source, &mut sink, &shutdown);
        assert_eq!(pipeline.counters(), PipelineCounters::default());
    }
}
