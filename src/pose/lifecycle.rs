//! Ownership and lifecycle of the pose-detection capability.
//!
//! `Uninitialized -> Initializing -> Ready -> Disposed`. A failed attempt
//! returns to `Uninitialized`, so the next `initialize` retries. Concurrent
//! callers never construct the capability twice: whoever finds the handle
//! `Initializing` waits on the condvar and shares that attempt's outcome.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::detector::{EstimatorLoader, PoseEstimator};
use super::keypoint::{Keypoint, Pose};
use super::mapper::resolve_space;
use super::preprocess::ModelInput;
use crate::error::DetectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

struct Inner {
    state: LifecycleState,
    last_error: Option<DetectorError>,
    /// Number of finished construction attempts; waiters key on it.
    attempts: u64,
}

pub struct DetectorHandle {
    loader: Box<dyn EstimatorLoader>,
    min_pose_score: f32,
    inner: Mutex<Inner>,
    changed: Condvar,
    estimator: Mutex<Option<Box<dyn PoseEstimator>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DetectorHandle {
    pub fn new(loader: impl EstimatorLoader + 'static, min_pose_score: f32) -> Self {
        Self {
            loader: Box::new(loader),
            min_pose_score,
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                last_error: None,
                attempts: 0,
            }),
            changed: Condvar::new(),
            estimator: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.inner).state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Error of the most recent failed attempt, cleared on success.
    pub fn last_error(&self) -> Option<DetectorError> {
        lock(&self.inner).last_error.clone()
    }

    /// Idempotent; concurrent callers share one construction attempt.
    pub fn initialize(&self) -> Result<(), DetectorError> {
        let mut inner = lock(&self.inner);
        let state = inner.state;
        match state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Disposed => Err(DetectorError::Disposed),
            LifecycleState::Initializing => self.wait_for_attempt(inner),
            LifecycleState::Uninitialized => {
                inner.state = LifecycleState::Initializing;
                drop(inner);
                self.construct()
            }
        }
    }

    /// Run `initialize` on a named thread.
    pub fn initialize_in_background(
        self: &Arc<Self>,
    ) -> std::io::Result<JoinHandle<Result<(), DetectorError>>> {
        let handle = Arc::clone(self);
        thread::Builder::new()
            .name("detector-init".to_string())
            .spawn(move || handle.initialize())
    }

    /// Drop the live capability and build a fresh one.
    pub fn reload(&self) -> Result<(), DetectorError> {
        let mut inner = lock(&self.inner);
        let state = inner.state;
        match state {
            LifecycleState::Disposed => return Err(DetectorError::Disposed),
            LifecycleState::Initializing => return self.wait_for_attempt(inner),
            LifecycleState::Ready | LifecycleState::Uninitialized => {
                inner.state = LifecycleState::Initializing;
            }
        }
        drop(inner);

        info!("reloading pose detector");
        // an in-progress detect finishes with the old capability first
        lock(&self.estimator).take();
        self.construct()
    }

    fn wait_for_attempt(&self, mut inner: MutexGuard<'_, Inner>) -> Result<(), DetectorError> {
        let attempt = inner.attempts;
        while inner.state == LifecycleState::Initializing && inner.attempts == attempt {
            inner = self
                .changed
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        match inner.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Disposed => Err(DetectorError::Disposed),
            _ => Err(inner
                .last_error
                .clone()
                .unwrap_or_else(|| DetectorError::Initialization("initialization did not complete".to_string()))),
        }
    }

    /// Called with the state already set to `Initializing`; the loader runs unlocked.
    fn construct(&self) -> Result<(), DetectorError> {
        let loaded = self.loader.load();

        let mut inner = lock(&self.inner);
        inner.attempts += 1;
        let result = match loaded {
            Ok(_) if inner.state == LifecycleState::Disposed => {
                debug!("detector disposed during initialization; dropping capability");
                Err(DetectorError::Disposed)
            }
            Ok(estimator) => {
                *lock(&self.estimator) = Some(estimator);
                inner.state = LifecycleState::Ready;
                inner.last_error = None;
                info!("pose detector ready");
                Ok(())
            }
            Err(e) => {
                if inner.state != LifecycleState::Disposed {
                    inner.state = LifecycleState::Uninitialized;
                }
                warn!("pose detector initialization failed: {}", e);
                inner.last_error = Some(e.clone());
                Err(e)
            }
        };
        self.changed.notify_all();
        result
    }

    /// Run the capability on one prepared frame.
    ///
    /// `Ok(None)` when nothing was detected or the pose's mean score is below
    /// the configured minimum. The returned pose is in normalized or model
    /// space depending on what the capability produced.
    pub fn detect(&self, input: ModelInput) -> Result<Option<Pose>, DetectorError> {
        if self.state() != LifecycleState::Ready {
            return Err(DetectorError::NotReady);
        }

        let mut guard = lock(&self.estimator);
        let estimator = guard.as_mut().ok_or(DetectorError::NotReady)?;
        let scale = estimator.output_scale();
        let raw = estimator.estimate(input.tensor)?;
        drop(guard);

        if raw.is_empty() {
            return Ok(None);
        }

        let space = resolve_space(scale, &raw);
        let pose = Pose::from_keypoints(
            raw.iter().map(|r| Keypoint::new(r.index, r.x, r.y, r.score)),
            space,
        );
        if pose.overall_score() < self.min_pose_score {
            debug!(score = pose.overall_score(), "pose below minimum score");
            return Ok(None);
        }
        Ok(Some(pose))
    }

    /// Release the capability. Terminal for this handle.
    pub fn dispose(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.state == LifecycleState::Disposed {
                return;
            }
            inner.state = LifecycleState::Disposed;
            self.changed.notify_all();
        }
        lock(&self.estimator).take();
        info!("pose detector disposed");
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
