//! Camera-frame computer-vision core: pose heatmap decoding and smoothing,
//! gesture classification, face detect-then-track, optional person
//! segmentation, and a fan-out hub that hands each result to independent
//! consumers.

pub mod config;
pub mod error;
pub mod face;
pub mod gesture;
pub mod pipeline;
pub mod pose;
pub mod preprocess;
pub mod segmentation;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Result, Stage, VisionError};
pub use gesture::{GestureClassifier, GestureFlags};
pub use pipeline::{DispatchHub, PipelineStages, VisionPipeline, start_pipeline};
pub use types::{FaceDetectionData, Frame, PredictedPoint};
