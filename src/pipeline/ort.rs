use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use rayon::prelude::*;

use super::{
    inference::{DepthEstimator, PoseDetection, PoseEstimator},
    resize::{resize_grid, resize_rgb},
};
use crate::{
    model_download::{ModelSource, ensure_model_ready},
    types::{DepthMap, Frame, Landmark, NUM_LANDMARKS},
};

pub const POSE_INPUT_SIZE: u32 = 256;
pub const DEPTH_INPUT_SIZE: u32 = 518;

/// The pose model emits 39 keypoints; the trailing 6 are auxiliary points
/// used by the tracker and are ignored.
const POSE_MODEL_KEYPOINTS: usize = 39;
const PIXEL_STRIDE: usize = 5;
const WORLD_STRIDE: usize = 3;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl LetterboxInfo {
    /// Maps a point in model input pixels back to normalized frame
    /// coordinates.
    pub fn normalize(&self, x: f32, y: f32) -> (f32, f32) {
        let px = (x - self.pad_x) / self.scale;
        let py = (y - self.pad_y) / self.scale;
        (px / self.orig_w.max(1) as f32, py / self.orig_h.max(1) as f32)
    }
}

fn session_from(source: &ModelSource, label: &str) -> Result<Session> {
    ensure_model_ready(source, label)?;
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(&source.path)
        .with_context(|| {
            format!(
                "failed to load {label} model from {}",
                source.path.display()
            )
        })?;
    log::info!("{label} model ready using {}", source.path.display());
    Ok(session)
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(3);
    if frame.rgb.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgb.len(),
            expected_len
        ));
    }
    Ok(())
}

/// Scales the frame to fit a `target_size` square, pads the remainder with
/// black and returns it as NHWC floats in `[0, 1]`.
pub fn prepare_letterbox(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, target_size);
    let resized = resize_rgb(&frame.rgb, frame.width, frame.height, new_w, new_h)?;

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 3];
    let dst_stride = target_size as usize * 3;
    let src_stride = new_w as usize * 3;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 3;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas.par_iter().map(|&v| v as f32 / 255.0).collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build pose input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };
    Ok((input, letterbox))
}

/// Stretches the frame to a `target_size` square and returns it as NCHW
/// ImageNet-normalized floats.
pub fn prepare_depth_input(frame: &Frame, target_size: u32) -> Result<Array4<f32>> {
    check_frame(frame)?;
    let resized = resize_rgb(&frame.rgb, frame.width, frame.height, target_size, target_size)?;

    let plane = (target_size as usize) * (target_size as usize);
    let mut data = vec![0f32; plane * 3];
    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(channel, out)| {
            let (mean, std) = (IMAGENET_MEAN[channel], IMAGENET_STD[channel]);
            for (dst, px) in out.iter_mut().zip(resized.chunks_exact(3)) {
                *dst = (px[channel] as f32 / 255.0 - mean) / std;
            }
        });

    Array4::<f32>::from_shape_vec((1, 3, target_size as usize, target_size as usize), data)
        .map_err(|err| anyhow!("failed to build depth input tensor: {err}"))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decodes the pixel and world landmark outputs of the pose model into
/// normalized pixel-space and metric world-space landmarks. At most
/// [`NUM_LANDMARKS`] of each are kept; a short output yields a short list.
pub fn decode_pose(pixel: &[f32], world: &[f32], letterbox: &LetterboxInfo) -> PoseDetection {
    let input_size = letterbox.scale * letterbox.orig_w.max(letterbox.orig_h) as f32;
    let pixel: Vec<Landmark> = pixel
        .chunks_exact(PIXEL_STRIDE)
        .take(NUM_LANDMARKS)
        .map(|chunk| {
            let (x, y) = letterbox.normalize(chunk[0], chunk[1]);
            Landmark::new(x, y, chunk[2] / input_size.max(1.0), sigmoid(chunk[3]))
        })
        .collect();
    let world = world
        .chunks_exact(WORLD_STRIDE)
        .take(NUM_LANDMARKS)
        .enumerate()
        .map(|(i, chunk)| {
            let visibility = pixel.get(i).map_or(0.0, |p| p.visibility);
            Landmark::new(chunk[0], chunk[1], chunk[2], visibility)
        })
        .collect();

    PoseDetection { pixel, world }
}

#[derive(Clone, Debug)]
pub struct PoseEstimatorConfig {
    /// Minimum pose flag for a frame to count as containing a person.
    pub score_threshold: f32,
}

impl Default for PoseEstimatorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
        }
    }
}

pub struct OrtPoseEstimator {
    session: Session,
    cfg: PoseEstimatorConfig,
}

impl OrtPoseEstimator {
    pub fn new(source: &ModelSource, cfg: PoseEstimatorConfig) -> Result<Self> {
        let session = session_from(source, "pose")?;
        Ok(Self { session, cfg })
    }
}

impl PoseEstimator for OrtPoseEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseDetection>> {
        let (input, letterbox) = prepare_letterbox(frame, POSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run pose session")?;

        if outputs.len() < 5 {
            return Err(anyhow!(
                "pose model returned {} outputs, expected at least 5",
                outputs.len()
            ));
        }

        let score = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if score < self.cfg.score_threshold {
            log::trace!("no person in frame (pose flag {score:.3})");
            return Ok(None);
        }

        let pixel: Vec<f32> = outputs[0].try_extract_array::<f32>()?.iter().copied().collect();
        let world: Vec<f32> = outputs[4].try_extract_array::<f32>()?.iter().copied().collect();
        if pixel.len() != POSE_MODEL_KEYPOINTS * PIXEL_STRIDE {
            log::debug!(
                "pose model emitted {} landmark values, expected {}",
                pixel.len(),
                POSE_MODEL_KEYPOINTS * PIXEL_STRIDE
            );
        }

        Ok(Some(decode_pose(&pixel, &world, &letterbox)))
    }
}

pub struct OrtDepthEstimator {
    session: Session,
}

impl OrtDepthEstimator {
    pub fn new(source: &ModelSource) -> Result<Self> {
        let session = session_from(source, "depth")?;
        Ok(Self { session })
    }
}

impl DepthEstimator for OrtDepthEstimator {
    fn estimate(&mut self, frame: &Frame) -> Result<DepthMap> {
        let input = prepare_depth_input(frame, DEPTH_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run depth session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("depth model returned no outputs"));
        }

        let depth = outputs[0].try_extract_array::<f32>()?;
        let shape = depth.shape().to_vec();
        let (out_h, out_w) = match shape.as_slice() {
            [.., h, w] => (*h as u32, *w as u32),
            _ => return Err(anyhow!("unexpected depth output shape {shape:?}")),
        };
        let values: Vec<f32> = depth.iter().copied().collect();
        if values.len() != (out_w as usize) * (out_h as usize) {
            return Err(anyhow!("depth output shape {shape:?} is not a single map"));
        }

        let values = resize_grid(values, out_w, out_h, frame.width, frame.height)?;
        DepthMap::new(frame.width, frame.height, values)
    }
}
