pub mod admission;
pub mod analysis;
pub mod angles;
pub mod camera;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pose;
pub mod tracker;

pub use admission::{AdmissionController, AdmissionMode};
pub use angles::{angle_at, shoulder_angles, ShoulderAngles};
pub use config::Config;
pub use error::{DetectorError, FrameError};
pub use pipeline::{LatestResult, PipelineStatus, PoseResult, PosePipeline, ResultSink};
