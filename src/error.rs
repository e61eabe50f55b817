//! Error types shared by the detector lifecycle and the per-frame pipeline.

use thiserror::Error;

use crate::pipeline::FrameStage;

/// Lifecycle-level failures of the detection capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    /// The capability could not be constructed (model asset missing, bad graph, ...).
    #[error("detector initialization failed: {0}")]
    Initialization(String),

    /// `detect` was called before the handle reached `Ready`.
    #[error("detector is not ready")]
    NotReady,

    /// The handle was disposed and can no longer be initialized.
    #[error("detector has been disposed")]
    Disposed,

    /// The capability failed while running inference on a frame.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Frame-local failures. Never propagated past the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Malformed compressed input or a raw buffer that does not match its geometry.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Degenerate input size or resizer failure.
    #[error("resize failed: {0}")]
    Resize(String),

    /// The detector was not usable for this frame.
    #[error("detector unavailable: {0}")]
    Detector(#[from] DetectorError),

    /// The frame took longer than the configured deadline.
    #[error("frame {sequence} exceeded deadline ({elapsed_ms} ms > {limit_ms} ms)")]
    Timeout {
        sequence: u64,
        elapsed_ms: u64,
        limit_ms: u64,
    },
}

impl FrameError {
    /// Stage the error is attributed to in logs and outcome reports.
    pub fn stage(&self) -> FrameStage {
        match self {
            Self::Decode(_) | Self::Resize(_) => FrameStage::Preprocessing,
            Self::Detector(_) => FrameStage::Detecting,
            Self::Timeout { .. } => FrameStage::Published,
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn resize(msg: impl Into<String>) -> Self {
        Self::Resize(msg.into())
    }
}

impl From<image::ImageError> for FrameError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DetectorError::Initialization("model missing".to_string());
        assert_eq!(err.to_string(), "detector initialization failed: model missing");

        let err = FrameError::from(DetectorError::NotReady);
        assert_eq!(err.to_string(), "detector unavailable: detector is not ready");
    }

    #[test]
    fn test_frame_error_stage() {
        assert_eq!(FrameError::decode("bad jpeg").stage(), FrameStage::Preprocessing);
        assert_eq!(FrameError::resize("0x0").stage(), FrameStage::Preprocessing);
        assert_eq!(FrameError::from(DetectorError::NotReady).stage(), FrameStage::Detecting);
    }
}
