use thiserror::Error;

/// Which CV stage produced an inference failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Pose,
    Face,
    Segmentation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pose => "pose",
            Stage::Face => "face",
            Stage::Segmentation => "segmentation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum VisionError {
    /// Camera or model could not be brought up; the feature stays disabled for
    /// the session.
    #[error("failed to set up {component}: {detail}")]
    Setup {
        component: &'static str,
        detail: String,
    },

    /// One frame's output for one stage is lost; the pipeline carries on.
    #[error("{stage} inference failed: {detail}")]
    Inference { stage: Stage, detail: String },

    /// Pixel data or format description missing; the frame is skipped for
    /// every stage.
    #[error("frame data not ready: {0}")]
    FrameUnready(&'static str),

    #[error("pixel buffer lock poisoned")]
    BufferPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VisionError {
    pub fn setup(component: &'static str, err: &anyhow::Error) -> Self {
        VisionError::Setup {
            component,
            detail: format!("{err:#}"),
        }
    }

    pub fn inference(stage: Stage, err: &anyhow::Error) -> Self {
        VisionError::Inference {
            stage,
            detail: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;
