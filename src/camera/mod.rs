#[cfg(feature = "desktop")]
pub mod capture;
pub mod frame;
pub mod source;

#[cfg(feature = "desktop")]
pub use capture::OpenCvCamera;
pub use frame::{FramePayload, FrameTask, PixelLayout};
pub use source::{
    FrameSource, ImageFileCamera, SourceAdmission, StillCamera, StillCaptureSource, StillImage, StreamFeeder,
    StreamFrameSource,
};
