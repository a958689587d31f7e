use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::{ImageBuffer, Luma, imageops::FilterType};

/// Bilinear resize of a packed RGB8 buffer.
pub fn resize_rgb(rgb: &[u8], width: u32, height: u32, new_w: u32, new_h: u32) -> Result<Vec<u8>> {
    let expected_len = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(3);
    if rgb.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            rgb.len(),
            expected_len
        ));
    }
    if (width, height) == (new_w, new_h) {
        return Ok(rgb.to_vec());
    }

    let src_image = fir::images::Image::from_vec_u8(width, height, rgb.to_vec(), fir::PixelType::U8x3)?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(dst_image.into_vec())
}

/// Output size of an integer downsample; never collapses a dimension to zero.
pub fn downsampled_size(width: u32, height: u32, factor: u32) -> (u32, u32) {
    let factor = factor.max(1);
    ((width / factor).max(1), (height / factor).max(1))
}

/// Resamples a single-channel float grid, e.g. a model's depth output, to a
/// new size.
pub fn resize_grid(values: Vec<f32>, width: u32, height: u32, new_w: u32, new_h: u32) -> Result<Vec<f32>> {
    if (width, height) == (new_w, new_h) {
        return Ok(values);
    }
    let grid: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(width, height, values)
        .ok_or_else(|| anyhow!("grid buffer does not match {width}x{height}"))?;
    let resized = image::imageops::resize(&grid, new_w, new_h, FilterType::Triangle);
    Ok(resized.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsampled_size() {
        assert_eq!(downsampled_size(640, 480, 4), (160, 120));
        assert_eq!(downsampled_size(3, 2, 4), (1, 1));
        assert_eq!(downsampled_size(10, 10, 0), (10, 10));
    }

    #[test]
    fn test_resize_rgb_uniform_color() {
        let rgb: Vec<u8> = [10u8, 20, 30].repeat(8 * 4);
        let out = resize_rgb(&rgb, 8, 4, 2, 1).unwrap();
        assert_eq!(out.len(), 2 * 3);
        for px in out.chunks_exact(3) {
            for (got, want) in px.iter().zip([10u8, 20, 30]) {
                assert!(got.abs_diff(want) <= 1);
            }
        }
    }

    #[test]
    fn test_resize_rgb_rejects_short_buffer() {
        assert!(resize_rgb(&[0u8; 5], 2, 2, 1, 1).is_err());
    }

    #[test]
    fn test_resize_grid_keeps_constant_depth() {
        let out = resize_grid(vec![2.5; 6 * 6], 6, 6, 3, 2).unwrap();
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-4));
    }
}
