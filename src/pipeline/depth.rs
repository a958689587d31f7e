//! Depth fusion: replaces landmark `z` with metric depth sampled from the
//! depth map of the same frame.
//!
//! The angle geometry consumes world-space landmarks whose `z` is the metric
//! depth found under the matching pixel-space landmark (see
//! [`fuse_world_depth`]). World `x`/`y` and sampled depth are all metric, so
//! no axis mixes normalized image units with metres.

use crate::{
    error::PipelineFault,
    types::{DepthMap, LandmarkSet},
};

/// Maps a normalized coordinate to a pixel index in `[0, len - 1]`.
///
/// `len` must be non-zero. Non-finite input maps to 0.
pub fn pixel_index(normalized: f32, len: u32) -> usize {
    let max = len.saturating_sub(1) as f32;
    let scaled = (normalized * len as f32).round();
    if scaled.is_nan() {
        return 0;
    }
    scaled.clamp(0.0, max) as usize
}

/// `(row, col)` of a normalized landmark position within `depth`.
pub fn pixel_position(x: f32, y: f32, depth: &DepthMap) -> (usize, usize) {
    (pixel_index(y, depth.height()), pixel_index(x, depth.width()))
}

fn check_dimensions(depth: &DepthMap, frame_size: (u32, u32)) -> Result<(), PipelineFault> {
    if depth.is_empty() {
        return Err(PipelineFault::data("depth map is empty"));
    }
    if (depth.width(), depth.height()) != frame_size {
        return Err(PipelineFault::data(format!(
            "depth map is {}x{} but frame is {}x{}",
            depth.width(),
            depth.height(),
            frame_size.0,
            frame_size.1
        )));
    }
    Ok(())
}

/// Pixel-space landmarks with `z` replaced by metric depth.
pub fn fuse_depth(
    pixel: &LandmarkSet,
    depth: &DepthMap,
    frame_size: (u32, u32),
) -> Result<LandmarkSet, PipelineFault> {
    check_dimensions(depth, frame_size)?;
    Ok(pixel.map(|_, landmark| {
        let (row, col) = pixel_position(landmark.x, landmark.y, depth);
        landmark.with_z(depth.at(row, col))
    }))
}

/// World-space landmarks with `z` replaced by the metric depth under the
/// corresponding pixel-space landmark.
pub fn fuse_world_depth(
    world: &LandmarkSet,
    pixel: &LandmarkSet,
    depth: &DepthMap,
    frame_size: (u32, u32),
) -> Result<LandmarkSet, PipelineFault> {
    let fused_pixel = fuse_depth(pixel, depth, frame_size)?;
    Ok(world.map(|index, landmark| landmark.with_z(fused_pixel.get(index).z)))
}
