use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::anyhow;
use crossbeam_channel::{TrySendError, bounded};

use super::{
    angles::extract_angles,
    camera::{CaptureDevice, FrameSource},
    depth::fuse_world_depth,
    filter::{TemporalFilter, clamp_sample},
    inference::{
        DepthEstimator, Detection, Inference, PoseDetection, PoseEstimator,
        start_inference_worker,
    },
    mailbox::Mailbox,
    publisher::Publisher,
};
use crate::{
    config::{Config, DEFAULT_ALPHA, ExecutionMode, InferencePolicy},
    error::PipelineFault,
    types::{AngleRecord, DepthMap, JointAngleSample, LandmarkSet},
};

/// Transport faults are logged on the first occurrence and then every this
/// many.
const TRANSPORT_WARN_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CaptureOpen,
    Running,
    Draining,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Cancelled,
    CaptureLost,
    InferenceAborted,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_captured: u64,
    pub samples_emitted: u64,
    pub frames_skipped: u64,
    pub transport_faults: u64,
    pub end_reason: Option<EndReason>,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub alpha: f32,
    pub execution: ExecutionMode,
    pub inference_policy: InferencePolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            execution: ExecutionMode::Sequential,
            inference_policy: InferencePolicy::SkipFrame,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            alpha: config.alpha,
            execution: config.execution,
            inference_policy: config.inference_policy,
        }
    }
}

/// One capture session: frames in, joint angle records out.
///
/// `run` drives `Idle → CaptureOpen → Running → Draining → Closed`. Every
/// exit from `Running`, whether cancellation or a fault, passes through
/// `Draining`, which flushes the publisher once and releases the camera.
pub struct Session<D, P, E, Pub>
where
    D: CaptureDevice,
    P: PoseEstimator,
    E: DepthEstimator,
    Pub: Publisher,
{
    source: FrameSource<D>,
    inference: Option<Inference<P, E>>,
    publisher: Pub,
    filter: TemporalFilter,
    options: SessionOptions,
    state: SessionState,
    started: Instant,
    report: SessionReport,
}

impl<D, P, E, Pub> Session<D, P, E, Pub>
where
    D: CaptureDevice,
    P: PoseEstimator,
    E: DepthEstimator,
    Pub: Publisher,
{
    pub fn new(
        source: FrameSource<D>,
        inference: Inference<P, E>,
        publisher: Pub,
        options: SessionOptions,
    ) -> Self {
        Self {
            source,
            inference: Some(inference),
            publisher,
            filter: TemporalFilter::new(options.alpha),
            options,
            state: SessionState::Idle,
            started: Instant::now(),
            report: SessionReport::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn publisher(&self) -> &Pub {
        &self.publisher
    }

    pub fn frame_source(&self) -> &FrameSource<D> {
        &self.source
    }

    /// Runs until `cancel` is set or a fatal fault occurs. The publisher has
    /// been flushed by the time this returns, whatever the outcome.
    pub fn run(&mut self, cancel: &AtomicBool) -> Result<SessionReport, PipelineFault> {
        if self.state != SessionState::Idle {
            return Err(PipelineFault::config("a session can only run once"));
        }

        self.filter.reset();
        self.report = SessionReport::default();
        self.started = Instant::now();

        self.transition(SessionState::CaptureOpen);
        let outcome = match self.source.open() {
            Ok(()) => {
                self.transition(SessionState::Running);
                let running = panic::catch_unwind(AssertUnwindSafe(|| {
                    match self.options.execution {
                        ExecutionMode::Sequential => self.run_sequential(cancel),
                        ExecutionMode::Pipelined => self.run_pipelined(cancel),
                    }
                }));
                running.unwrap_or_else(|payload| {
                    Err(PipelineFault::unexpected(format!(
                        "frame loop panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                })
            }
            Err(err) => Err(err),
        };
        self.report.end_reason = Some(end_reason(&outcome));

        self.transition(SessionState::Draining);
        let flushed = self.publisher.finish();
        self.source.close();
        self.transition(SessionState::Closed);

        log::info!(
            "session ended ({:?}): {} frames captured, {} samples emitted, {} skipped, {} transport faults",
            self.report.end_reason,
            self.report.frames_captured,
            self.report.samples_emitted,
            self.report.frames_skipped,
            self.report.transport_faults
        );

        match (outcome, flushed) {
            (Ok(()), Ok(())) => Ok(self.report.clone()),
            (Ok(()), Err(flush_err)) => Err(flush_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(flush_err)) => {
                log::error!("flush after failed session also failed: {flush_err:?}");
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        log::info!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run_sequential(&mut self, cancel: &AtomicBool) -> Result<(), PipelineFault> {
        let mut inference = self
            .inference
            .take()
            .ok_or_else(|| PipelineFault::config("session has no inference engine"))?;

        let outcome = loop {
            if cancel.load(Ordering::SeqCst) {
                break Ok(());
            }
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(err) => break Err(err),
            };
            self.report.frames_captured += 1;

            let detection = match inference.run(&frame) {
                Ok(detection) => detection,
                Err(err) => match self.options.inference_policy {
                    InferencePolicy::Abort => break Err(err),
                    InferencePolicy::SkipFrame => {
                        log::warn!("skipping frame {}: {err:?}", frame.seq);
                        self.report.frames_skipped += 1;
                        continue;
                    }
                },
            };

            if let Err(err) = self.handle_detection(detection) {
                break Err(err);
            }
        };

        self.inference = Some(inference);
        outcome
    }

    fn run_pipelined(&mut self, cancel: &AtomicBool) -> Result<(), PipelineFault> {
        let inference = self
            .inference
            .take()
            .ok_or_else(|| PipelineFault::config("session has no inference engine"))?;

        if self.options.inference_policy == InferencePolicy::Abort {
            log::warn!("abort on inference error is not honoured in pipelined mode; failed frames are skipped");
        }

        let (frame_tx, frame_rx) = bounded(1);
        let mailbox = Arc::new(Mailbox::new());
        let worker = start_inference_worker(inference, frame_rx, Arc::clone(&mailbox));

        let mut outcome = loop {
            if cancel.load(Ordering::SeqCst) {
                break Ok(());
            }
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(err) => break Err(err),
            };
            self.report.frames_captured += 1;

            match frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    log::trace!("inference busy, dropping frame {}", frame.seq);
                    self.report.frames_skipped += 1;
                }
                Err(TrySendError::Disconnected(_)) => {
                    break Err(PipelineFault::inference(
                        "inference worker stopped",
                        anyhow!("frame channel disconnected"),
                    ));
                }
            }

            if let Some(detection) = mailbox.take() {
                if let Err(err) = self.handle_detection(detection) {
                    break Err(err);
                }
            }
        };

        drop(frame_tx);
        if worker.join().is_err() {
            log::error!("inference worker panicked");
        }

        // The frame in flight when the loop stopped.
        if outcome.is_ok() {
            if let Some(detection) = mailbox.take() {
                outcome = self.handle_detection(detection);
            }
        }
        outcome
    }

    /// Turns one detection into a published record. Data faults skip the
    /// frame; transport faults drop the record. Anything else is fatal.
    fn handle_detection(&mut self, detection: Detection) -> Result<(), PipelineFault> {
        let Detection {
            seq,
            frame_size,
            timestamp,
            pose,
            depth,
        } = detection;
        let Some(pose) = pose else {
            log::trace!("no person in frame {seq}");
            self.report.frames_skipped += 1;
            return Ok(());
        };

        let angles = match self.process(seq, pose, &depth, frame_size) {
            Ok(angles) => angles,
            Err(err) => {
                log::debug!("skipping frame {seq}: {err}");
                self.report.frames_skipped += 1;
                return Ok(());
            }
        };

        let elapsed = timestamp.saturating_duration_since(self.started);
        let record = AngleRecord {
            frame: seq,
            timestamp_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            angles,
        };
        log::debug!("frame {} angles {:?}", record.frame, record.angles);

        match self.publisher.publish(&record) {
            Ok(()) => {
                self.report.samples_emitted += 1;
                Ok(())
            }
            Err(err @ PipelineFault::Transport { .. }) => {
                self.report.transport_faults += 1;
                let faults = self.report.transport_faults;
                if faults == 1 || faults % TRANSPORT_WARN_EVERY == 0 {
                    log::warn!(
                        "dropped sample for frame {} ({faults} so far): {err:?}",
                        record.frame
                    );
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Landmark count or finiteness problems and a depth map that does not
    /// match the frame all surface as `Data` faults.
    fn process(
        &mut self,
        seq: u64,
        pose: PoseDetection,
        depth: &DepthMap,
        frame_size: (u32, u32),
    ) -> Result<JointAngleSample, PipelineFault> {
        let pixel = LandmarkSet::from_vec(pose.pixel)?;
        let world = LandmarkSet::from_vec(pose.world)?;
        let fused = fuse_world_depth(&world, &pixel, depth, frame_size)?;
        let raw = extract_angles(&fused);
        log::trace!("frame {seq} raw angles {raw:?}");
        Ok(self.filter.apply(&clamp_sample(&raw)))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn end_reason(outcome: &Result<(), PipelineFault>) -> EndReason {
    match outcome {
        Ok(()) => EndReason::Cancelled,
        Err(PipelineFault::Capture { .. }) => EndReason::CaptureLost,
        Err(PipelineFault::Inference { .. }) => EndReason::InferenceAborted,
        Err(_) => EndReason::Failed,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex, atomic::AtomicUsize},
        thread,
        time::Duration,
    };

    use anyhow::Result;

    use super::*;
    use crate::{
        config::CaptureConfig,
        pipeline::publisher::{RecordingPublisher, read_records},
        types::{
            DepthMap, Frame, LEFT_ELBOW, LEFT_SHOULDER, LEFT_WRIST, Landmark, NUM_LANDMARKS,
            RIGHT_ELBOW, RIGHT_SHOULDER, RIGHT_WRIST,
        },
    };

    /// Yields `frames` good reads, then either cancels or fails forever.
    struct MockCamera {
        frames: u64,
        served: u64,
        fail_after: bool,
        cancel: Arc<AtomicBool>,
        delay: Duration,
        released: Arc<AtomicUsize>,
    }

    impl MockCamera {
        fn new(frames: u64, cancel: &Arc<AtomicBool>) -> Self {
            Self {
                frames,
                served: 0,
                fail_after: false,
                cancel: Arc::clone(cancel),
                delay: Duration::ZERO,
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl CaptureDevice for MockCamera {
        fn acquire(&mut self) -> Result<()> {
            Ok(())
        }

        fn grab(&mut self) -> Result<(Vec<u8>, u32, u32)> {
            if self.served >= self.frames {
                if self.fail_after {
                    return Err(anyhow!("unplugged"));
                }
                self.cancel.store(true, Ordering::SeqCst);
            }
            self.served += 1;
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok((vec![0; 4 * 4 * 3], 4, 4))
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Left elbow drifts outward with each frame. Frames listed in `fail_on`
    /// error, `absent_on` contain nobody, `nan_on` carry a NaN left elbow,
    /// `short_on` lose their last landmark and `panic_on` panic.
    #[derive(Default)]
    struct MockPose {
        fail_on: Vec<u64>,
        absent_on: Vec<u64>,
        nan_on: Vec<u64>,
        short_on: Vec<u64>,
        panic_on: Vec<u64>,
    }

    impl PoseEstimator for MockPose {
        fn estimate(&mut self, frame: &Frame) -> Result<Option<PoseDetection>> {
            if self.panic_on.contains(&frame.seq) {
                panic!("estimator blew up on frame {}", frame.seq);
            }
            if self.fail_on.contains(&frame.seq) {
                return Err(anyhow!("model crashed on frame {}", frame.seq));
            }
            if self.absent_on.contains(&frame.seq) {
                return Ok(None);
            }
            let mut points = vec![Landmark::new(0.5, 0.5, 0.0, 1.0); NUM_LANDMARKS];
            points[LEFT_SHOULDER] = Landmark::new(0.0, 0.0, 0.0, 1.0);
            points[LEFT_ELBOW] = Landmark::new(0.05 * frame.seq as f32, 0.3, 0.0, 1.0);
            points[LEFT_WRIST] = Landmark::new(0.0, 0.6, 0.0, 1.0);
            points[RIGHT_SHOULDER] = Landmark::new(1.0, 0.0, 0.0, 1.0);
            points[RIGHT_ELBOW] = Landmark::new(1.0, 0.3, 0.0, 1.0);
            points[RIGHT_WRIST] = Landmark::new(1.0, 0.6, 0.0, 1.0);
            if self.nan_on.contains(&frame.seq) {
                points[LEFT_ELBOW].x = f32::NAN;
            }
            if self.short_on.contains(&frame.seq) {
                points.pop();
            }
            Ok(Some(PoseDetection {
                pixel: points.clone(),
                world: points,
            }))
        }
    }

    /// Uniform depth; frames in `wrong_size_on` get a map one column short.
    #[derive(Default)]
    struct FlatDepth {
        wrong_size_on: Vec<u64>,
    }

    impl DepthEstimator for FlatDepth {
        fn estimate(&mut self, frame: &Frame) -> Result<DepthMap> {
            let width = if self.wrong_size_on.contains(&frame.seq) {
                frame.width - 1
            } else {
                frame.width
            };
            Ok(DepthMap::filled(width, frame.height, 2.0))
        }
    }

    #[derive(Clone, Default)]
    struct SharedPublisher {
        records: Arc<Mutex<Vec<AngleRecord>>>,
        finishes: Arc<AtomicUsize>,
        refuse: bool,
        fail_finish: bool,
    }

    impl Publisher for SharedPublisher {
        fn publish(&mut self, record: &AngleRecord) -> Result<(), PipelineFault> {
            if self.refuse {
                return Err(PipelineFault::transport("refused", anyhow!("503")));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), PipelineFault> {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            if self.fail_finish {
                return Err(PipelineFault::persist("disk full", anyhow!("ENOSPC")));
            }
            Ok(())
        }
    }

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            downsample: 1,
            max_retries: 2,
            backoff: Duration::ZERO,
            ..CaptureConfig::default()
        }
    }

    fn session_with_depth(
        camera: MockCamera,
        pose: MockPose,
        depth: FlatDepth,
        publisher: SharedPublisher,
        options: SessionOptions,
    ) -> Session<MockCamera, MockPose, FlatDepth, SharedPublisher> {
        Session::new(
            FrameSource::new(camera, capture_config()),
            Inference::new(pose, depth),
            publisher,
            options,
        )
    }

    fn session(
        camera: MockCamera,
        pose: MockPose,
        publisher: SharedPublisher,
        options: SessionOptions,
    ) -> Session<MockCamera, MockPose, FlatDepth, SharedPublisher> {
        session_with_depth(camera, pose, FlatDepth::default(), publisher, options)
    }

    fn frames_of(publisher: &SharedPublisher) -> Vec<u64> {
        publisher
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.frame)
            .collect()
    }

    #[test]
    fn test_cancel_before_first_frame_still_flushes_once() {
        let cancel = Arc::new(AtomicBool::new(true));
        let camera = MockCamera::new(10, &cancel);
        let released = Arc::clone(&camera.released);
        let publisher = SharedPublisher::default();
        let mut session = session(
            camera,
            MockPose::default(),
            publisher.clone(),
            SessionOptions::default(),
        );

        let report = session.run(&cancel).unwrap();
        assert_eq!(report.frames_captured, 0);
        assert_eq!(report.end_reason, Some(EndReason::Cancelled));
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
        assert!(released.load(Ordering::SeqCst) >= 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_capture_fault_mid_session_flushes_buffered_records() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut camera = MockCamera::new(3, &cancel);
        camera.fail_after = true;
        let publisher = SharedPublisher::default();
        let mut session = session(
            camera,
            MockPose::default(),
            publisher.clone(),
            SessionOptions::default(),
        );

        let err = session.run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineFault::Capture { .. }));
        assert_eq!(frames_of(&publisher), vec![0, 1, 2]);
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
        assert_eq!(session.report().end_reason, Some(EndReason::CaptureLost));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_inference_error_skips_frame_by_default() {
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = SharedPublisher::default();
        let pose = MockPose {
            fail_on: vec![1],
            absent_on: vec![3],
            ..MockPose::default()
        };
        let mut session = session(
            MockCamera::new(5, &cancel),
            pose,
            publisher.clone(),
            SessionOptions::default(),
        );

        let report = session.run(&cancel).unwrap();
        assert_eq!(frames_of(&publisher), vec![0, 2, 4, 5]);
        assert_eq!(report.frames_skipped, 2);
        assert_eq!(report.samples_emitted, 4);
    }

    #[test]
    fn test_inference_error_aborts_when_configured() {
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = SharedPublisher::default();
        let pose = MockPose {
            fail_on: vec![2],
            ..MockPose::default()
        };
        let options = SessionOptions {
            inference_policy: InferencePolicy::Abort,
            ..SessionOptions::default()
        };
        let mut session = session(MockCamera::new(5, &cancel), pose, publisher.clone(), options);

        let err = session.run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineFault::Inference { .. }));
        assert_eq!(frames_of(&publisher), vec![0, 1]);
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
        assert_eq!(session.report().end_reason, Some(EndReason::InferenceAborted));
    }

    #[test]
    fn test_transport_faults_do_not_stop_the_session() {
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = SharedPublisher {
            refuse: true,
            ..SharedPublisher::default()
        };
        let mut session = session(
            MockCamera::new(4, &cancel),
            MockPose::default(),
            publisher.clone(),
            SessionOptions::default(),
        );

        let report = session.run(&cancel).unwrap();
        assert_eq!(report.transport_faults, 5);
        assert_eq!(report.samples_emitted, 0);
        assert_eq!(report.end_reason, Some(EndReason::Cancelled));
    }

    #[test]
    fn test_run_fault_wins_over_flush_fault() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut camera = MockCamera::new(1, &cancel);
        camera.fail_after = true;
        let publisher = SharedPublisher {
            fail_finish: true,
            ..SharedPublisher::default()
        };
        let mut session = session(
            camera,
            MockPose::default(),
            publisher.clone(),
            SessionOptions::default(),
        );

        let err = session.run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineFault::Capture { .. }));
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_fault_is_returned_after_clean_run() {
        let cancel = Arc::new(AtomicBool::new(true));
        let publisher = SharedPublisher {
            fail_finish: true,
            ..SharedPublisher::default()
        };
        let mut session = session(
            MockCamera::new(1, &cancel),
            MockPose::default(),
            publisher,
            SessionOptions::default(),
        );
        let err = session.run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineFault::Persist { .. }));
    }

    #[test]
    fn test_session_runs_only_once() {
        let cancel = Arc::new(AtomicBool::new(true));
        let publisher = SharedPublisher::default();
        let mut session = session(
            MockCamera::new(1, &cancel),
            MockPose::default(),
            publisher.clone(),
            SessionOptions::default(),
        );
        session.run(&cancel).unwrap();
        assert!(matches!(
            session.run(&cancel),
            Err(PipelineFault::Config { .. })
        ));
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_records_are_clamped_and_smoothed() {
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = SharedPublisher::default();
        let options = SessionOptions {
            alpha: 1.0,
            ..SessionOptions::default()
        };
        let mut session = session(
            MockCamera::new(3, &cancel),
            MockPose::default(),
            publisher.clone(),
            options,
        );
        session.run(&cancel).unwrap();

        let records = publisher.records.lock().unwrap();
        for record in records.iter() {
            for (_, value) in record.angles.iter() {
                assert!((0.0..=90.0).contains(&value));
            }
            // A straight arm bends 180 degrees and is clamped.
            assert_eq!(record.angles.get(crate::types::JointKey::RightElbow), 90.0);
        }
        assert!(records.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    }

    #[test]
    fn test_pipelined_output_is_strictly_ordered() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut camera = MockCamera::new(20, &cancel);
        camera.delay = Duration::from_millis(2);
        let publisher = SharedPublisher::default();
        let options = SessionOptions {
            execution: ExecutionMode::Pipelined,
            ..SessionOptions::default()
        };
        let mut session = session(camera, MockPose::default(), publisher.clone(), options);

        let report = session.run(&cancel).unwrap();
        let frames = frames_of(&publisher);
        assert!(!frames.is_empty());
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(report.frames_captured, 21);
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unusable_detections_are_skipped_under_abort() {
        let cancel = Arc::new(AtomicBool::new(false));
        let publisher = SharedPublisher::default();
        let pose = MockPose {
            nan_on: vec![1],
            short_on: vec![2],
            ..MockPose::default()
        };
        let depth = FlatDepth {
            wrong_size_on: vec![3],
        };
        let options = SessionOptions {
            inference_policy: InferencePolicy::Abort,
            ..SessionOptions::default()
        };
        let mut session = session_with_depth(
            MockCamera::new(4, &cancel),
            pose,
            depth,
            publisher.clone(),
            options,
        );

        let report = session.run(&cancel).unwrap();
        assert_eq!(frames_of(&publisher), vec![0, 4]);
        assert_eq!(report.frames_captured, 5);
        assert_eq!(report.frames_skipped, 3);
        assert_eq!(report.samples_emitted, 2);
        assert_eq!(report.end_reason, Some(EndReason::Cancelled));
    }

    #[test]
    fn test_panic_in_frame_loop_still_drains() {
        let cancel = Arc::new(AtomicBool::new(false));
        let camera = MockCamera::new(10, &cancel);
        let released = Arc::clone(&camera.released);
        let publisher = SharedPublisher::default();
        let pose = MockPose {
            panic_on: vec![2],
            ..MockPose::default()
        };
        let mut session = session(camera, pose, publisher.clone(), SessionOptions::default());

        let err = session.run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineFault::Unexpected { .. }));
        assert_eq!(frames_of(&publisher), vec![0, 1]);
        assert_eq!(publisher.finishes.load(Ordering::SeqCst), 1);
        assert!(released.load(Ordering::SeqCst) >= 1);
        assert_eq!(session.report().end_reason, Some(EndReason::Failed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_panic_with_recording_publisher_writes_artifact() {
        let output = std::env::temp_dir().join(format!(
            "pose-relay-panic-{}.json",
            std::process::id()
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let pose = MockPose {
            panic_on: vec![2],
            ..MockPose::default()
        };
        let mut session = Session::new(
            FrameSource::new(MockCamera::new(10, &cancel), capture_config()),
            Inference::new(pose, FlatDepth::default()),
            RecordingPublisher::new(output.clone()),
            SessionOptions::default(),
        );

        assert!(session.run(&cancel).is_err());
        let written = read_records(&output).unwrap();
        std::fs::remove_file(&output).unwrap();
        assert_eq!(written.len(), 2);
    }
}
