pub mod bgra_converter;
#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod hub;
pub mod worker;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::CaptureSession;
pub use hub::{Channel, DispatchHub, PreviewFrame, Subscription};
pub use worker::{PipelineStages, VisionPipeline, start_pipeline};
