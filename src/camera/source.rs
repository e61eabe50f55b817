//! Frame sources behind one pull interface.
//!
//! Still-capture cameras are polled by the pipeline on its own tick. Streaming
//! cameras push into a depth-1 slot through a [`StreamFeeder`], which runs the
//! admission decision at arrival so the producer is never blocked and nothing
//! is ever queued.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::frame::{FrameTask, PixelLayout};
use crate::admission::AdmissionController;

/// Where the admission decision for a source's frames is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAdmission {
    /// The pipeline gates before asking for a frame (poll mode).
    OnTick,
    /// Frames were already admitted when they arrived (stream mode).
    OnArrival,
}

pub trait FrameSource {
    /// `None` or the latest frame; never a backlog.
    fn next_frame(&mut self) -> Option<FrameTask>;

    fn admission(&self) -> SourceAdmission {
        SourceAdmission::OnTick
    }
}

/// A compressed still capture.
#[derive(Debug, Clone)]
pub struct StillImage {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Camera that produces one compressed still per call.
pub trait StillCamera {
    fn capture(&mut self) -> Result<StillImage>;
}

impl<F> StillCamera for F
where
    F: FnMut() -> Result<StillImage>,
{
    fn capture(&mut self) -> Result<StillImage> {
        self()
    }
}

/// Poll-mode source wrapping a [`StillCamera`].
pub struct StillCaptureSource<C> {
    camera: C,
    next_sequence: u64,
}

impl<C: StillCamera> StillCaptureSource<C> {
    pub fn new(camera: C) -> Self {
        Self { camera, next_sequence: 0 }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }
}

impl<C: StillCamera> FrameSource for StillCaptureSource<C> {
    fn next_frame(&mut self) -> Option<FrameTask> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        match self.camera.capture() {
            Ok(still) => Some(FrameTask::encoded(sequence, still.width, still.height, still.bytes)),
            Err(e) => {
                warn!(sequence, "still capture failed: {:#}", e);
                None
            }
        }
    }
}

/// Reads image files from disk in order, one per capture, looping at the end.
pub struct ImageFileCamera {
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
}

impl ImageFileCamera {
    pub fn new(paths: Vec<PathBuf>, looping: bool) -> Self {
        Self { paths, cursor: 0, looping }
    }

    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.cursor >= self.paths.len()
    }
}

impl StillCamera for ImageFileCamera {
    fn capture(&mut self) -> Result<StillImage> {
        if self.paths.is_empty() || self.is_exhausted() {
            anyhow::bail!("no more images");
        }
        let path = &self.paths[self.cursor % self.paths.len()];
        self.cursor += 1;

        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()?
            .into_dimensions()
            .with_context(|| format!("unrecognised image {}", path.display()))?;
        Ok(StillImage { width, height, bytes })
    }
}

type Slot = Arc<Mutex<Option<FrameTask>>>;

fn lock_slot(slot: &Mutex<Option<FrameTask>>) -> MutexGuard<'_, Option<FrameTask>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Stream-mode source: a single overwrite slot holding the latest admitted frame.
pub struct StreamFrameSource {
    slot: Slot,
}

impl StreamFrameSource {
    /// Create the source and the feeder handed to the stream callback.
    pub fn new(gate: Arc<AdmissionController>) -> (Self, StreamFeeder) {
        let slot: Slot = Arc::new(Mutex::new(None));
        let feeder = StreamFeeder {
            slot: Arc::clone(&slot),
            gate,
            arrivals: Arc::new(AtomicU64::new(0)),
        };
        (Self { slot }, feeder)
    }
}

impl FrameSource for StreamFrameSource {
    fn next_frame(&mut self) -> Option<FrameTask> {
        lock_slot(&self.slot).take()
    }

    fn admission(&self) -> SourceAdmission {
        SourceAdmission::OnArrival
    }
}

/// Producer side of [`StreamFrameSource`]; cheap to clone into a capture thread.
#[derive(Clone)]
pub struct StreamFeeder {
    slot: Slot,
    gate: Arc<AdmissionController>,
    arrivals: Arc<AtomicU64>,
}

impl StreamFeeder {
    /// Offer a raw frame. Returns whether it was admitted.
    pub fn push_raw(&self, pixels: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> bool {
        let sequence = self.arrivals.fetch_add(1, Ordering::Relaxed);
        self.offer(FrameTask::raw(sequence, width, height, layout, pixels))
    }

    /// Offer a prepared task; its sequence number is kept as is.
    pub fn offer(&self, task: FrameTask) -> bool {
        if !self.gate.try_admit() {
            return false;
        }
        let replaced = lock_slot(&self.slot).replace(task);
        if let Some(stale) = replaced {
            debug!(sequence = stale.sequence, "stale frame overwritten in slot");
        }
        true
    }
}
