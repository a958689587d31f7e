pub mod angles;
pub mod camera;
pub mod depth;
pub mod filter;
pub mod inference;
pub mod mailbox;
pub mod ort;
pub mod publisher;
pub mod resize;
pub mod rgb_converter;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, NokhwaDevice, available_cameras};
pub use camera::{CaptureDevice, FrameSource};
pub use inference::{DepthEstimator, Detection, Inference, PoseDetection, PoseEstimator};
pub use ort::{OrtDepthEstimator, OrtPoseEstimator, PoseEstimatorConfig};
pub use publisher::{HttpPublisher, Publisher, RecordingPublisher};
pub use session::{EndReason, Session, SessionOptions, SessionReport, SessionState};
