use std::{env, path::PathBuf, time::Duration};

const POSE_MODEL_FILENAME: &str = "cpm_pose_14.onnx";
const FACE_DETECTOR_MODEL_FILENAME: &str = "face_detection_ultraface_320.onnx";
const FACE_LANDMARK_MODEL_FILENAME: &str = "face_landmarks_68.onnx";
const SEGMENTATION_MODEL_FILENAME: &str = "deeplabv3_257.onnx";

/// PASCAL VOC "person".
pub const DEFAULT_SEGMENTATION_CLASS: u32 = 15;
pub const DEFAULT_MAX_FPS: u32 = 30;

/// How the published preview buffer is oriented relative to the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewRotation {
    None,
    /// 90° anticlockwise, for a portrait renderer fed by a landscape sensor.
    Left,
}

/// Behaviour of the `mop` flag when its geometric condition does not hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MopRule {
    /// `mop` is reported true on every classified frame.
    AlwaysOn,
    /// `mop` requires the wrists together and one wrist at its shoulder.
    Geometric,
}

#[derive(Clone, Debug)]
pub struct GestureConfig {
    pub mop_rule: MopRule,
    /// When set, every gesture except `calibrated` stays false until the
    /// calibration condition holds on the same frame.
    pub gate_on_calibration: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            mop_rule: MopRule::AlwaysOn,
            gate_on_calibration: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FaceTrackerConfig {
    pub min_track_confidence: f32,
    /// Margin applied to a tracked box before landmark refinement.
    pub landmark_roi_expansion: f32,
}

impl Default for FaceTrackerConfig {
    fn default() -> Self {
        Self {
            min_track_confidence: 0.3,
            landmark_roi_expansion: 1.2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelPaths {
    pub pose: PathBuf,
    pub face_detector: PathBuf,
    pub face_landmarks: PathBuf,
    pub segmentation: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        let dir = PathBuf::from("models");
        Self {
            pose: dir.join(POSE_MODEL_FILENAME),
            face_detector: dir.join(FACE_DETECTOR_MODEL_FILENAME),
            face_landmarks: dir.join(FACE_LANDMARK_MODEL_FILENAME),
            segmentation: dir.join(SEGMENTATION_MODEL_FILENAME),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub models: ModelPaths,
    pub max_fps: u32,
    /// Front-facing sensor: keypoints are mirrored horizontally.
    pub mirror_pose: bool,
    pub preview_rotation: PreviewRotation,
    /// Horizontal field of view of the capture device. When known, frames
    /// carry pinhole intrinsics derived from it.
    pub camera_fov_degrees: Option<f32>,
    pub enable_segmentation: bool,
    pub segmentation_class: u32,
    pub gestures: GestureConfig,
    pub face: FaceTrackerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            models: ModelPaths::default(),
            max_fps: DEFAULT_MAX_FPS,
            mirror_pose: true,
            preview_rotation: PreviewRotation::Left,
            camera_fov_degrees: None,
            enable_segmentation: false,
            segmentation_class: DEFAULT_SEGMENTATION_CLASS,
            gestures: GestureConfig::default(),
            face: FaceTrackerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MOCHI_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("MOCHI_POSE_MODEL") {
            cfg.models.pose = PathBuf::from(path);
        }
        if let Some(path) = lookup("MOCHI_FACE_MODEL") {
            cfg.models.face_detector = PathBuf::from(path);
        }
        if let Some(path) = lookup("MOCHI_LANDMARK_MODEL") {
            cfg.models.face_landmarks = PathBuf::from(path);
        }
        if let Some(path) = lookup("MOCHI_SEGMENTATION_MODEL") {
            cfg.models.segmentation = PathBuf::from(path);
        }

        if let Some(fps) = lookup("MOCHI_MAX_FPS").and_then(|v| v.parse::<u32>().ok()) {
            if fps > 0 {
                cfg.max_fps = fps.min(DEFAULT_MAX_FPS);
            } else {
                log::warn!("ignoring MOCHI_MAX_FPS=0");
            }
        }
        if let Some(flag) = lookup("MOCHI_MIRROR_POSE").and_then(|v| parse_flag(&v)) {
            cfg.mirror_pose = flag;
        }
        if let Some(flag) = lookup("MOCHI_ROTATE_PREVIEW").and_then(|v| parse_flag(&v)) {
            cfg.preview_rotation = if flag {
                PreviewRotation::Left
            } else {
                PreviewRotation::None
            };
        }
        if let Some(fov) = lookup("MOCHI_CAMERA_FOV").and_then(|v| v.parse::<f32>().ok()) {
            if fov > 0.0 && fov < 180.0 {
                cfg.camera_fov_degrees = Some(fov);
            } else {
                log::warn!("ignoring MOCHI_CAMERA_FOV={fov}");
            }
        }
        if let Some(flag) = lookup("MOCHI_SEGMENTATION").and_then(|v| parse_flag(&v)) {
            cfg.enable_segmentation = flag;
        }
        if let Some(class) = lookup("MOCHI_SEGMENTATION_CLASS").and_then(|v| v.parse().ok()) {
            cfg.segmentation_class = class;
        }
        if let Some(flag) = lookup("MOCHI_STRICT_MOP").and_then(|v| parse_flag(&v)) {
            cfg.gestures.mop_rule = if flag {
                MopRule::Geometric
            } else {
                MopRule::AlwaysOn
            };
        }
        if let Some(flag) = lookup("MOCHI_GATE_ON_CALIBRATION").and_then(|v| parse_flag(&v)) {
            cfg.gestures.gate_on_calibration = flag;
        }

        cfg
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1_000 / u64::from(self.max_fps.max(1)))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_preserve_observed_behaviour() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_fps, 30);
        assert!(cfg.mirror_pose);
        assert_eq!(cfg.gestures.mop_rule, MopRule::AlwaysOn);
        assert!(!cfg.gestures.gate_on_calibration);
        assert_eq!(cfg.face.min_track_confidence, 0.3);
        assert_eq!(cfg.frame_interval(), Duration::from_millis(33));
        assert_eq!(cfg.camera_fov_degrees, None);
    }

    #[test]
    fn lookup_overrides_and_caps_fps() {
        let vars: HashMap<&str, &str> = [
            ("MOCHI_POSE_MODEL", "/tmp/pose.onnx"),
            ("MOCHI_MAX_FPS", "60"),
            ("MOCHI_STRICT_MOP", "yes"),
            ("MOCHI_SEGMENTATION", "on"),
            ("MOCHI_MIRROR_POSE", "garbage"),
            ("MOCHI_CAMERA_FOV", "68.5"),
        ]
        .into_iter()
        .collect();
        let cfg = PipelineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.models.pose, PathBuf::from("/tmp/pose.onnx"));
        assert_eq!(cfg.max_fps, 30);
        assert_eq!(cfg.gestures.mop_rule, MopRule::Geometric);
        assert!(cfg.enable_segmentation);
        assert!(cfg.mirror_pose);
        assert_eq!(cfg.camera_fov_degrees, Some(68.5));

        let cfg = PipelineConfig::from_lookup(|k| (k == "MOCHI_CAMERA_FOV").then(|| "200".into()));
        assert_eq!(cfg.camera_fov_degrees, None);
    }
}
