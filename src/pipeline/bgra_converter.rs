use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_bgra, yuyv422_to_bgra,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Layouts a capture device may hand us before conversion to BGRA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Bgra,
    Nv12,
    Yuyv,
    Mjpeg,
    RawRgb,
    RawBgr,
    Gray,
}

#[derive(Debug)]
pub struct BgraFrame {
    pub bgra: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn convert_to_bgra(
    format: SourceFormat,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<BgraFrame> {
    let bgra = match format {
        SourceFormat::Bgra => bgra_copy(data, width, height)?,
        SourceFormat::Nv12 => nv12_to_bgra(data, width, height)?,
        SourceFormat::Yuyv => yuyv_to_bgra(data, width, height)?,
        SourceFormat::Mjpeg => return mjpeg_to_bgra(data),
        SourceFormat::RawRgb => rgb_like_to_bgra(data, width, height, true)?,
        SourceFormat::RawBgr => rgb_like_to_bgra(data, width, height, false)?,
        SourceFormat::Gray => gray_to_bgra(data, width, height)?,
    };

    Ok(BgraFrame {
        bgra,
        width,
        height,
    })
}

fn ensure_len(data: &[u8], expected: usize, label: &str) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{label} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn bgra_copy(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 4;
    ensure_len(data, expected_len, "BGRA")?;
    Ok(data[..expected_len].to_vec())
}

fn nv12_to_bgra(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    ensure_len(data, y_plane_len + uv_plane_len, "NV12")?;

    let y_plane = &data[..y_plane_len];
    let uv_plane = &data[y_plane_len..y_plane_len + uv_plane_len];
    let mut bgra = vec![0u8; y_plane_len * 4];

    let image = YuvBiPlanarImage {
        y_plane,
        y_stride: width,
        uv_plane,
        uv_stride: width,
        width,
        height,
    };

    yuv_nv12_to_bgra(
        &image,
        &mut bgra,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→BGRA failed: {err:?}"))?;

    Ok(bgra)
}

fn yuyv_to_bgra(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 2;
    ensure_len(data, expected_len, "YUYV")?;

    let mut bgra = vec![0u8; (width as usize * height as usize) * 4];
    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    yuyv422_to_bgra(
        &packed,
        &mut bgra,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→BGRA failed: {err:?}"))?;

    Ok(bgra)
}

fn mjpeg_to_bgra(data: &[u8]) -> Result<BgraFrame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let mut pixels = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    let expected_len = usize::try_from(width)
        .and_then(|w| usize::try_from(height).map(|h| w * h * 4))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    if pixels.len() < expected_len {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {}",
            pixels.len(),
            expected_len
        ));
    }

    pixels.truncate(expected_len);
    pixels.par_chunks_mut(4).for_each(|px| px.swap(0, 2));

    Ok(BgraFrame {
        bgra: pixels,
        width,
        height,
    })
}

fn rgb_like_to_bgra(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 3;
    ensure_len(data, expected_len, "RGB")?;

    let mut bgra = vec![0u8; (width as usize * height as usize) * 4];
    bgra.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            if swap_rb {
                dst[0] = src[2];
                dst[1] = src[1];
                dst[2] = src[0];
            } else {
                dst[0] = src[0];
                dst[1] = src[1];
                dst[2] = src[2];
            }
            dst[3] = 255;
        });

    Ok(bgra)
}

fn gray_to_bgra(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize;
    ensure_len(data, expected_len, "GRAY")?;

    let mut bgra = vec![0u8; expected_len * 4];
    bgra.par_chunks_mut(4)
        .zip(data[..expected_len].par_iter().copied())
        .for_each(|(dst, value)| {
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
            dst[3] = 255;
        });

    Ok(bgra)
}
