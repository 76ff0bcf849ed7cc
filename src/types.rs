use std::{
    sync::{Arc, RwLock, RwLockReadGuard},
    time::Instant,
};

use crate::error::VisionError;

/// Packed 32-bit colour layouts a [`Frame`] can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Geometry and layout of a pixel buffer, delivered alongside it to the
/// preview consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl FormatDescription {
    pub fn bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Bgra8,
        }
    }

    pub fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.pixel_format.bytes_per_pixel())
    }
}

/// Row-major 3x3 intrinsic matrix reported by the capture device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraIntrinsics(pub [[f32; 3]; 3]);

impl CameraIntrinsics {
    /// Pinhole model for a sensor with square pixels and a centred principal
    /// point, from its horizontal field of view.
    pub fn from_horizontal_fov(width: u32, height: u32, fov_degrees: f32) -> Self {
        let cx = width as f32 * 0.5;
        let cy = height as f32 * 0.5;
        let focal = cx / (fov_degrees.to_radians() * 0.5).tan();
        CameraIntrinsics([[focal, 0.0, cx], [0.0, focal, cy], [0.0, 0.0, 1.0]])
    }

    pub fn focal_length(&self) -> f32 {
        self.0[0][0]
    }

    /// Intrinsics of the same view after the image is turned 90°
    /// anticlockwise. `source_width` is the width before rotation.
    pub fn rotated_anticlockwise(&self, source_width: u32) -> Self {
        let [[fx, _, cx], [_, fy, cy], _] = self.0;
        CameraIntrinsics([
            [fy, 0.0, cy],
            [0.0, fx, source_width as f32 - cx],
            [0.0, 0.0, 1.0],
        ])
    }
}

/// Pixel storage shared between the capture side and the CV stages.
///
/// Readers take a scoped lock for the duration of one inference; the guard
/// releases on every exit path.
#[derive(Debug)]
pub struct PixelBuffer {
    data: RwLock<Vec<u8>>,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn lock_read(&self) -> Result<RwLockReadGuard<'_, Vec<u8>>, VisionError> {
        self.data.read().map_err(|_| VisionError::BufferPoisoned)
    }

}

/// One camera tick. Cloning shares the underlying buffer; use
/// [`Frame::detached_copy`] before handing the frame to a stage that outlives
/// the capture cadence.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Arc<PixelBuffer>,
    pub format: Option<FormatDescription>,
    pub timestamp: Instant,
    pub intrinsics: Option<CameraIntrinsics>,
}

impl Frame {
    pub fn new(bgra: Vec<u8>, width: u32, height: u32, timestamp: Instant) -> Self {
        Self {
            pixels: Arc::new(PixelBuffer::new(bgra)),
            format: Some(FormatDescription::bgra(width, height)),
            timestamp,
            intrinsics: None,
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: CameraIntrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    /// Returns the format description if the frame is complete enough to run
    /// any CV stage on.
    pub fn ready_format(&self) -> Result<FormatDescription, VisionError> {
        let format = self
            .format
            .ok_or(VisionError::FrameUnready("missing format description"))?;
        if format.width == 0 || format.height == 0 {
            return Err(VisionError::FrameUnready("zero-sized frame"));
        }
        let len = self.pixels.lock_read()?.len();
        if len != format.expected_len() {
            return Err(VisionError::FrameUnready("pixel buffer size mismatch"));
        }
        Ok(format)
    }

    pub fn detached_copy(&self) -> Result<Frame, VisionError> {
        let data = self.pixels.lock_read()?.clone();
        Ok(Frame {
            pixels: Arc::new(PixelBuffer::new(data)),
            format: self.format,
            timestamp: self.timestamp,
            intrinsics: self.intrinsics,
        })
    }
}

/// A single joint estimate in normalized `[0,1]x[0,1]` image space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedPoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl PredictedPoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

/// Axis-aligned box in normalized image coordinates (origin top-left).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Grows the box around its centre and clamps it to the unit square.
    pub fn expanded(&self, factor: f32) -> NormalizedRect {
        let cx = self.x + self.width * 0.5;
        let cy = self.y + self.height * 0.5;
        let w = self.width * factor;
        let h = self.height * factor;
        let x1 = (cx - w * 0.5).clamp(0.0, 1.0);
        let y1 = (cy - h * 0.5).clamp(0.0, 1.0);
        let x2 = (cx + w * 0.5).clamp(0.0, 1.0);
        let y2 = (cy + h * 0.5).clamp(0.0, 1.0);
        NormalizedRect::from_corners(x1, y1, x2, y2)
    }
}

/// Face box handed to consumers, in portrait consumer space.
///
/// Detector space and consumer space differ by the sensor mounting: x/y and
/// width/height are swapped on the way out (see [`FaceDetectionData::from_detector_rect`]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceDetectionData {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceDetectionData {
    pub fn from_detector_rect(rect: &NormalizedRect) -> Self {
        Self {
            x: rect.y,
            y: rect.x,
            width: rect.height,
            height: rect.width,
        }
    }
}
