pub mod detector;
pub mod keypoint;
pub mod lifecycle;
pub mod mapper;
pub mod preprocess;
pub mod skeleton;

pub use detector::{EstimatorLoader, OnnxLoader, OnnxPoseEstimator, OutputScale, PoseEstimator, RawKeypoint};
pub use keypoint::{CoordinateSpace, Keypoint, KeypointIndex, Pose, Side};
pub use lifecycle::{DetectorHandle, LifecycleState};
pub use mapper::CoordinateMapper;
pub use preprocess::{FrameGeometry, ModelInput, Preprocessor, ScaleFactors};
pub use skeleton::SKELETON_CONNECTIONS;
