use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Pixel layouts a capture driver may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Nv12,
    Yuyv,
    Mjpeg,
    RawRgb,
    RawBgr,
    Gray,
}

#[derive(Debug)]
pub struct RgbFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[cfg(feature = "camera-nokhwa")]
pub fn convert_camera_frame(frame: &nokhwa::Buffer) -> Result<RgbFrame> {
    use nokhwa::utils::FrameFormat;

    let resolution = frame.resolution();
    let format = match frame.source_frame_format() {
        FrameFormat::NV12 => SourceFormat::Nv12,
        FrameFormat::YUYV => SourceFormat::Yuyv,
        FrameFormat::MJPEG => SourceFormat::Mjpeg,
        FrameFormat::RAWRGB => SourceFormat::RawRgb,
        FrameFormat::RAWBGR => SourceFormat::RawBgr,
        FrameFormat::GRAY => SourceFormat::Gray,
    };
    convert(format, frame.buffer(), resolution.width_x, resolution.height_y)
}

pub fn convert(format: SourceFormat, data: &[u8], width: u32, height: u32) -> Result<RgbFrame> {
    let (rgb, width, height) = match format {
        SourceFormat::Nv12 => (nv12_to_rgb(data, width, height)?, width, height),
        SourceFormat::Yuyv => (yuyv_to_rgb(data, width, height)?, width, height),
        SourceFormat::Mjpeg => mjpeg_to_rgb(data)?,
        SourceFormat::RawRgb => (packed_to_rgb(data, width, height, false)?, width, height),
        SourceFormat::RawBgr => (packed_to_rgb(data, width, height, true)?, width, height),
        SourceFormat::Gray => (gray_to_rgb(data, width, height)?, width, height),
    };

    Ok(RgbFrame { rgb, width, height })
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    if data.len() < y_plane_len + uv_plane_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_plane_len + uv_plane_len
        ));
    }

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgb = vec![0u8; y_plane_len * 3];
    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 2;
    if data.len() < expected_len {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGB failed: {err:?}"))?;

    Ok(rgb)
}

// The JPEG header is authoritative for the size; the driver's reported
// resolution is ignored.
fn mjpeg_to_rgb(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgb = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder returned no image info"))?;
    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    let expected_len = usize::try_from(width)
        .and_then(|w| usize::try_from(height).map(|h| w * h * 3))
        .map_err(|_| anyhow!("MJPEG dimensions do not fit usize"))?;
    if rgb.len() < expected_len {
        return Err(anyhow!(
            "MJPEG decode produced too few bytes: got {}, expected {}",
            rgb.len(),
            expected_len
        ));
    }

    Ok((rgb, width, height))
}

fn packed_to_rgb(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 3;
    if data.len() < expected_len {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let src = &data[..expected_len];
    if !swap_rb {
        return Ok(src.to_vec());
    }

    let mut rgb = vec![0u8; expected_len];
    rgb.par_chunks_exact_mut(3)
        .zip(src.par_chunks_exact(3))
        .for_each(|(dst, px)| {
            dst[0] = px[2];
            dst[1] = px[1];
            dst[2] = px[0];
        });

    Ok(rgb)
}

fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize;
    if data.len() < expected_len {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = vec![0u8; expected_len * 3];
    rgb.par_chunks_exact_mut(3)
        .zip(data[..expected_len].par_iter().copied())
        .for_each(|(dst, value)| dst.fill(value));

    Ok(rgb)
}
