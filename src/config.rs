use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};

use crate::{error::PipelineFault, model_download::ModelSource};

pub const ENDPOINT_ENV: &str = "POSE_RELAY_ENDPOINT";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/angles";
pub const POSE_MODEL_URL_ENV: &str = "POSE_RELAY_POSE_MODEL_URL";
pub const DEPTH_MODEL_URL_ENV: &str = "POSE_RELAY_DEPTH_MODEL_URL";

pub const DEFAULT_OUTPUT: &str = "pose_data.json";
pub const DEFAULT_ALPHA: f32 = 0.1;
pub const DOWNSAMPLE_FACTOR: u32 = 4;
pub const MAX_CAPTURE_RETRIES: u32 = 5;
pub const CAPTURE_BACKOFF: Duration = Duration::from_millis(200);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_millis(50);

const POSE_MODEL_FILENAME: &str = "pose_estimation_mediapipe_2023mar.onnx";
const DEPTH_MODEL_FILENAME: &str = "depth_anything_v2_metric_indoor_small.onnx";

const USAGE: &str = "\
usage: pose-relay [options]

  --stream                     publish every sample to the endpoint in $POSE_RELAY_ENDPOINT
  --camera <index|path>        camera to open (default: 0)
  --output <path>              where buffered samples are written (default: pose_data.json)
  --alpha <0..1>               smoothing weight of the newest sample (default: 0.1)
  --pipelined                  run inference on a worker thread
  --abort-on-inference-error   end the session on the first estimator failure
                               (sequential mode only)
  --pose-model <path>          pose landmark ONNX model
  --depth-model <path>         metric depth ONNX model
  -h, --help                   show this message";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSelector {
    Index(u32),
    Path(String),
}

impl CameraSelector {
    fn parse(raw: &str) -> Self {
        match raw.parse::<u32>() {
            Ok(index) => CameraSelector::Index(index),
            Err(_) => CameraSelector::Path(raw.to_string()),
        }
    }
}

impl Default for CameraSelector {
    fn default() -> Self {
        CameraSelector::Index(0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishMode {
    Stream { endpoint: String },
    Record { output: PathBuf },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Pipelined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferencePolicy {
    /// An estimator error ends the session.
    Abort,
    /// An estimator error skips the frame.
    SkipFrame,
}

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub camera: CameraSelector,
    pub downsample: u32,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera: CameraSelector::default(),
            downsample: DOWNSAMPLE_FACTOR,
            max_retries: MAX_CAPTURE_RETRIES,
            backoff: CAPTURE_BACKOFF,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub capture: CaptureConfig,
    pub publish: PublishMode,
    pub publish_timeout: Duration,
    pub alpha: f32,
    pub execution: ExecutionMode,
    pub inference_policy: InferencePolicy,
    pub pose_model: ModelSource,
    pub depth_model: ModelSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            publish: PublishMode::Record {
                output: PathBuf::from(DEFAULT_OUTPUT),
            },
            publish_timeout: PUBLISH_TIMEOUT,
            alpha: DEFAULT_ALPHA,
            execution: ExecutionMode::Sequential,
            inference_policy: InferencePolicy::SkipFrame,
            pose_model: ModelSource::local(default_model_path(POSE_MODEL_FILENAME)),
            depth_model: ModelSource::local(default_model_path(DEPTH_MODEL_FILENAME)),
        }
    }
}

pub fn default_model_path(filename: &str) -> PathBuf {
    PathBuf::from("models").join(filename)
}

pub fn usage() -> &'static str {
    USAGE
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Invocation {
    Run(Config),
    Help,
}

impl Config {
    /// Parses command-line flags and applies environment overrides.
    pub fn from_args<I, S>(args: I) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_args_with_env(args, |key| std::env::var(key).ok())
    }

    pub fn from_args_with_env<I, S, E>(args: I, env: E) -> Result<Invocation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let mut stream = false;
        let mut output = PathBuf::from(DEFAULT_OUTPUT);
        let mut pose_model_path = None;
        let mut depth_model_path = None;

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            let mut value_for = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("missing value for {flag}"))
            };
            match arg.as_str() {
                "-h" | "--help" => return Ok(Invocation::Help),
                "--stream" => stream = true,
                "--pipelined" => config.execution = ExecutionMode::Pipelined,
                "--abort-on-inference-error" => config.inference_policy = InferencePolicy::Abort,
                "--camera" => config.capture.camera = CameraSelector::parse(&value_for("--camera")?),
                "--output" => output = PathBuf::from(value_for("--output")?),
                "--alpha" => {
                    let raw = value_for("--alpha")?;
                    config.alpha = raw
                        .parse()
                        .with_context(|| format!("invalid --alpha value {raw:?}"))?;
                }
                "--pose-model" => pose_model_path = Some(PathBuf::from(value_for("--pose-model")?)),
                "--depth-model" => {
                    depth_model_path = Some(PathBuf::from(value_for("--depth-model")?))
                }
                other => bail!("unknown argument {other:?}\n\n{USAGE}"),
            }
        }

        config.publish = if stream {
            PublishMode::Stream {
                endpoint: env(ENDPOINT_ENV).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            }
        } else {
            PublishMode::Record { output }
        };

        if let Some(path) = pose_model_path {
            config.pose_model.path = path;
        }
        if let Some(path) = depth_model_path {
            config.depth_model.path = path;
        }
        config.pose_model.url = env(POSE_MODEL_URL_ENV);
        config.depth_model.url = env(DEPTH_MODEL_URL_ENV);

        config.validate()?;
        Ok(Invocation::Run(config))
    }

    pub fn validate(&self) -> Result<(), PipelineFault> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(PipelineFault::config(format!(
                "alpha must lie in [0, 1], got {}",
                self.alpha
            )));
        }
        if self.capture.max_retries == 0 {
            return Err(PipelineFault::config("max_retries must be at least 1"));
        }
        if self.capture.downsample == 0 {
            return Err(PipelineFault::config("downsample factor must be at least 1"));
        }
        if self.execution == ExecutionMode::Pipelined
            && self.inference_policy == InferencePolicy::Abort
        {
            // The worker thread has no way to end the session.
            return Err(PipelineFault::config(
                "--abort-on-inference-error cannot be combined with --pipelined",
            ));
        }
        if let PublishMode::Stream { endpoint } = &self.publish {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(PipelineFault::config(format!(
                    "endpoint {endpoint:?} is not an http(s) URL"
                )));
            }
        }
        Ok(())
    }
}
