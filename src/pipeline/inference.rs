use std::{sync::Arc, thread};

use crossbeam_channel::Receiver;

use super::mailbox::{Mailbox, Sequenced};
use crate::{
    error::PipelineFault,
    types::{DepthMap, Frame, Landmark},
};

/// Both landmark variants of one detected person, as the estimator emitted
/// them. Counts and finiteness are checked when the frame is processed.
#[derive(Clone, Debug, Default)]
pub struct PoseDetection {
    pub pixel: Vec<Landmark>,
    pub world: Vec<Landmark>,
}

pub trait PoseEstimator: Send + 'static {
    /// `Ok(None)` when no person is in frame.
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<Option<PoseDetection>>;
}

pub trait DepthEstimator: Send + 'static {
    /// Metric depth with the frame's own dimensions.
    fn estimate(&mut self, frame: &Frame) -> anyhow::Result<DepthMap>;
}

/// Everything the geometry stages need for one frame.
#[derive(Clone, Debug)]
pub struct Detection {
    pub seq: u64,
    pub frame_size: (u32, u32),
    pub timestamp: std::time::Instant,
    pub pose: Option<PoseDetection>,
    pub depth: DepthMap,
}

impl Sequenced for Detection {
    fn seq(&self) -> u64 {
        self.seq
    }
}

/// The pose and depth estimators run back to back on the same frame.
pub struct Inference<P, D> {
    pose: P,
    depth: D,
}

impl<P: PoseEstimator, D: DepthEstimator> Inference<P, D> {
    pub fn new(pose: P, depth: D) -> Self {
        Self { pose, depth }
    }

    pub fn run(&mut self, frame: &Frame) -> Result<Detection, PipelineFault> {
        let pose = self
            .pose
            .estimate(frame)
            .map_err(|err| PipelineFault::inference("pose estimation failed", err))?;
        // Without a person the depth map is never read.
        let depth = if pose.is_some() {
            self.depth
                .estimate(frame)
                .map_err(|err| PipelineFault::inference("depth estimation failed", err))?
        } else {
            DepthMap::filled(0, 0, 0.0)
        };

        Ok(Detection {
            seq: frame.seq,
            frame_size: (frame.width, frame.height),
            timestamp: frame.timestamp,
            pose,
            depth,
        })
    }
}

/// Runs inference on its own thread, publishing each result into `mailbox`.
/// Exits when the frame channel disconnects.
pub fn start_inference_worker<P, D>(
    mut inference: Inference<P, D>,
    frame_rx: Receiver<Frame>,
    mailbox: Arc<Mailbox<Detection>>,
) -> thread::JoinHandle<()>
where
    P: PoseEstimator,
    D: DepthEstimator,
{
    thread::spawn(move || {
        log::info!("inference worker started");
        while let Some(frame) = recv_latest_frame(&frame_rx) {
            match inference.run(&frame) {
                Ok(detection) => {
                    if mailbox.put(detection).is_some() {
                        log::trace!("replaced an unread detection");
                    }
                }
                Err(err) => {
                    log::warn!("inference failed on frame {}: {err:?}", frame.seq);
                }
            }
        }
        log::info!("inference worker stopped");
    })
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Frame> {
    let mut frame = frame_rx.recv().ok()?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}
