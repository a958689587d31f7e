use std::{thread, time::Instant};

use anyhow::Result;

use super::resize::{downsampled_size, resize_rgb};
use crate::{config::CaptureConfig, error::PipelineFault, types::Frame};

/// A raw camera handle. `FrameSource` layers retry, reinitialisation and
/// downsampling on top of it.
pub trait CaptureDevice {
    fn acquire(&mut self) -> Result<()>;
    /// Next full-resolution frame as packed RGB: `(rgb, width, height)`.
    fn grab(&mut self) -> Result<(Vec<u8>, u32, u32)>;
    fn release(&mut self);
}

pub struct FrameSource<D: CaptureDevice> {
    device: D,
    config: CaptureConfig,
    next_seq: u64,
    open: bool,
}

impl<D: CaptureDevice> FrameSource<D> {
    pub fn new(device: D, config: CaptureConfig) -> Self {
        Self {
            device,
            config,
            next_seq: 0,
            open: false,
        }
    }

    pub fn open(&mut self) -> Result<(), PipelineFault> {
        self.device
            .acquire()
            .map_err(|err| PipelineFault::capture("failed to open camera", err))?;
        self.open = true;
        log::info!("camera opened");
        Ok(())
    }

    /// Reads and downsamples the next frame. A failed read releases and
    /// re-acquires the device before retrying; after `max_retries`
    /// consecutive failures the fault is terminal.
    pub fn read_frame(&mut self) -> Result<Frame, PipelineFault> {
        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.device.grab() {
                Ok((rgb, width, height)) => match self.downsample(rgb, width, height) {
                    Ok(frame) => return Ok(frame),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if attempt >= max_retries {
                log::error!("camera read failed {attempt} times in a row: {err:?}");
                return Err(PipelineFault::capture(
                    format!("camera unreachable after {attempt} attempts"),
                    err,
                ));
            }

            log::warn!("camera read failed (attempt {attempt}/{max_retries}): {err:?}");
            self.device.release();
            thread::sleep(self.config.backoff);
            if let Err(err) = self.device.acquire() {
                log::warn!("failed to reinitialise camera: {err:?}");
            }
        }
    }

    pub fn close(&mut self) {
        self.device.release();
        if self.open {
            log::info!("camera released");
        }
        self.open = false;
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn downsample(&mut self, rgb: Vec<u8>, width: u32, height: u32) -> Result<Frame> {
        let (new_w, new_h) = downsampled_size(width, height, self.config.downsample);
        let rgb = resize_rgb(&rgb, width, height, new_w, new_h)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(Frame {
            rgb,
            width: new_w,
            height: new_h,
            seq,
            timestamp: Instant::now(),
        })
    }
}

impl<D: CaptureDevice> Drop for FrameSource<D> {
    fn drop(&mut self) {
        self.device.release();
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use self::nokhwa_device::{CameraDevice, NokhwaDevice, available_cameras};

#[cfg(feature = "camera-nokhwa")]
mod nokhwa_device {
    use anyhow::{Context, Result, anyhow};
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
            RequestedFormatType,
        },
    };

    use super::CaptureDevice;
    use crate::{config::CameraSelector, pipeline::rgb_converter};

    // Prefer pixel formats that are widely supported on macOS (the built-in cameras
    // often reject YUYV even though Nokhwa reports it).
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::MJPEG,
    ];

    fn requested_formats() -> [RequestedFormat<'static>; 3] {
        [
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    #[derive(Clone, Debug)]
    pub struct CameraDevice {
        pub index: CameraIndex,
        pub label: String,
    }

    pub fn available_cameras() -> Result<Vec<CameraDevice>> {
        let cameras = query(ApiBackend::Auto)?;
        Ok(cameras
            .into_iter()
            .map(|info| CameraDevice {
                index: info.index().clone(),
                label: format_camera_label(&info),
            })
            .collect())
    }

    fn format_camera_label(info: &CameraInfo) -> String {
        format!("{} ({})", info.human_name(), info.index())
    }

    fn build_camera(index: CameraIndex) -> Result<Camera> {
        let mut last_err = None;

        for requested in requested_formats() {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }

    /// The platform camera, selected once when the session starts.
    pub struct NokhwaDevice {
        index: CameraIndex,
        camera: Option<Camera>,
    }

    impl NokhwaDevice {
        pub fn new(selector: &CameraSelector) -> Self {
            let index = match selector {
                CameraSelector::Index(index) => CameraIndex::Index(*index),
                CameraSelector::Path(path) => CameraIndex::String(path.clone()),
            };
            Self {
                index,
                camera: None,
            }
        }
    }

    impl CaptureDevice for NokhwaDevice {
        fn acquire(&mut self) -> Result<()> {
            if self.camera.is_some() {
                return Ok(());
            }
            let camera = build_camera(self.index.clone())
                .with_context(|| format!("failed to open camera {}", self.index))?;
            log::info!(
                "camera {} streaming {:?}",
                self.index,
                camera.camera_format()
            );
            self.camera = Some(camera);
            Ok(())
        }

        fn grab(&mut self) -> Result<(Vec<u8>, u32, u32)> {
            let camera = self
                .camera
                .as_mut()
                .ok_or_else(|| anyhow!("camera {} is not open", self.index))?;
            let buffer = camera.frame().context("camera frame read failed")?;
            let converted = rgb_converter::convert_camera_frame(&buffer)?;
            Ok((converted.rgb, converted.width, converted.height))
        }

        fn release(&mut self) {
            if let Some(mut camera) = self.camera.take() {
                if let Err(err) = camera.stop_stream() {
                    log::warn!("failed to stop camera stream: {err:?}");
                }
            }
        }
    }
}
