use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, NormalizedRect};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, height, width, 3]`
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

/// Per-channel `(value / 255 - mean) / std` normalisation, RGB order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const UNIT: Normalization = Normalization {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    /// `(v - 127) / 128`, common for face detectors.
    pub const SIGNED: Normalization = Normalization {
        mean: [127.0 / 255.0, 127.0 / 255.0, 127.0 / 255.0],
        std: [128.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0],
    };

    fn apply(&self, channel: usize, value: u8) -> f32 {
        (value as f32 / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
    pub normalization: Normalization,
}

/// Stretches the whole frame to the model input size, ignoring aspect ratio.
pub fn prepare_scale_fill(frame: &Frame, spec: &InputSpec) -> Result<Array4<f32>> {
    let format = frame.ready_format()?;
    let pixels = frame.pixels.lock_read()?;
    let resized = resize_bgra(
        pixels.to_vec(),
        format.width,
        format.height,
        None,
        spec.width,
        spec.height,
    )?;
    drop(pixels);

    to_tensor(&resized, spec)
}

/// Crops `region` (normalized) out of the frame and scales it to the model
/// input size. Returns the crop in pixel coordinates alongside the tensor.
pub fn prepare_region(
    frame: &Frame,
    region: &NormalizedRect,
    spec: &InputSpec,
) -> Result<(Array4<f32>, PixelCrop)> {
    let format = frame.ready_format()?;
    let crop = PixelCrop::from_normalized(region, format.width, format.height)
        .ok_or_else(|| anyhow!("crop region {region:?} is empty"))?;

    let pixels = frame.pixels.lock_read()?;
    let resized = resize_bgra(
        pixels.to_vec(),
        format.width,
        format.height,
        Some(&crop),
        spec.width,
        spec.height,
    )?;
    drop(pixels);

    Ok((to_tensor(&resized, spec)?, crop))
}

/// Integer pixel rectangle inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelCrop {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PixelCrop {
    pub fn from_normalized(region: &NormalizedRect, frame_width: u32, frame_height: u32) -> Option<Self> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = (region.x * fw).floor().clamp(0.0, fw);
        let y1 = (region.y * fh).floor().clamp(0.0, fh);
        let x2 = ((region.x + region.width) * fw).ceil().clamp(0.0, fw);
        let y2 = ((region.y + region.height) * fh).ceil().clamp(0.0, fh);

        let width = (x2 - x1) as u32;
        let height = (y2 - y1) as u32;
        if width == 0 || height == 0 {
            return None;
        }

        Some(Self {
            left: x1 as u32,
            top: y1 as u32,
            width,
            height,
            frame_width,
            frame_height,
        })
    }

    /// Maps a point given relative to the crop (`[0,1]` each axis) back to
    /// normalized frame coordinates.
    pub fn to_frame(&self, u: f32, v: f32) -> (f32, f32) {
        let x = (self.left as f32 + u * self.width as f32) / self.frame_width as f32;
        let y = (self.top as f32 + v * self.height as f32) / self.frame_height as f32;
        (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
    }
}

fn resize_bgra(
    bgra: Vec<u8>,
    width: u32,
    height: u32,
    crop: Option<&PixelCrop>,
    target_w: u32,
    target_h: u32,
) -> Result<Vec<u8>> {
    let src_image = fir::images::Image::from_vec_u8(width, height, bgra, fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);

    let mut resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    if let Some(crop) = crop {
        resize_options = resize_options.crop(
            crop.left as f64,
            crop.top as f64,
            crop.width as f64,
            crop.height as f64,
        );
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;

    Ok(dst_image.into_vec())
}

fn to_tensor(bgra: &[u8], spec: &InputSpec) -> Result<Array4<f32>> {
    let w = spec.width as usize;
    let h = spec.height as usize;
    let norm = spec.normalization;

    match spec.layout {
        TensorLayout::Nhwc => {
            let data: Vec<f32> = bgra
                .par_chunks_exact(4)
                .flat_map_iter(|px| {
                    [
                        norm.apply(0, px[2]),
                        norm.apply(1, px[1]),
                        norm.apply(2, px[0]),
                    ]
                })
                .collect();
            Array4::<f32>::from_shape_vec((1, h, w, 3), data)
                .map_err(|err| anyhow!("failed to build NHWC input tensor: {err}"))
        }
        TensorLayout::Nchw => {
            let plane = w * h;
            let mut data = vec![0.0_f32; plane * 3];
            let (r_plane, rest) = data.split_at_mut(plane);
            let (g_plane, b_plane) = rest.split_at_mut(plane);
            r_plane
                .par_iter_mut()
                .zip(g_plane.par_iter_mut())
                .zip(b_plane.par_iter_mut())
                .zip(bgra.par_chunks_exact(4))
                .for_each(|(((r, g), b), px)| {
                    *r = norm.apply(0, px[2]);
                    *g = norm.apply(1, px[1]);
                    *b = norm.apply(2, px[0]);
                });
            Array4::<f32>::from_shape_vec((1, 3, h, w), data)
                .map_err(|err| anyhow!("failed to build NCHW input tensor: {err}"))
        }
    }
}
