use std::{
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
};

use anyhow::{Context, Result};
use pose_relay::{
    config::{Config, Invocation, PublishMode, usage},
    pipeline::{HttpPublisher, Publisher, RecordingPublisher},
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config = match Config::from_args(std::env::args().skip(1))? {
        Invocation::Run(config) => config,
        Invocation::Help => {
            println!("{}", usage());
            return Ok(());
        }
    };
    config.validate()?;

    let cancel = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel))
        .context("failed to install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&cancel))
        .context("failed to install SIGTERM handler")?;

    match &config.publish {
        PublishMode::Stream { endpoint } => {
            log::info!("streaming joint angles to {endpoint}");
            let publisher = HttpPublisher::new(endpoint.clone(), config.publish_timeout)?;
            run_session(&config, publisher, &cancel)
        }
        PublishMode::Record { output } => {
            log::info!("recording joint angles to {}", output.display());
            run_session(&config, RecordingPublisher::new(output.clone()), &cancel)
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
fn run_session<Pub: Publisher>(config: &Config, publisher: Pub, cancel: &AtomicBool) -> Result<()> {
    use pose_relay::pipeline::{
        FrameSource, Inference, NokhwaDevice, OrtDepthEstimator, OrtPoseEstimator,
        PoseEstimatorConfig, Session, SessionOptions, available_cameras,
    };

    match available_cameras() {
        Ok(cameras) => {
            for camera in cameras {
                log::debug!("found camera {}", camera.label);
            }
        }
        Err(err) => log::warn!("failed to list cameras: {err:?}"),
    }

    let pose = OrtPoseEstimator::new(&config.pose_model, PoseEstimatorConfig::default())?;
    let depth = OrtDepthEstimator::new(&config.depth_model)?;
    let source = FrameSource::new(
        NokhwaDevice::new(&config.capture.camera),
        config.capture.clone(),
    );

    let mut session = Session::new(
        source,
        Inference::new(pose, depth),
        publisher,
        SessionOptions::from(config),
    );
    let report = session.run(cancel)?;
    log::info!("session finished: {report:?}");
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn run_session<Pub: Publisher>(_config: &Config, _publisher: Pub, _cancel: &AtomicBool) -> Result<()> {
    anyhow::bail!("pose-relay was built without camera support (enable the camera-nokhwa feature)")
}
