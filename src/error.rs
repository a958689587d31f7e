use thiserror::Error;

/// Failures the frame loop distinguishes. Each kind is handled at the stage
/// that can recover from it; see `pipeline::session`.
#[derive(Debug, Error)]
pub enum PipelineFault {
    /// Camera unreachable after exhausting retries. Ends the session.
    #[error("capture fault: {message}")]
    Capture {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Pose or depth estimator call failed.
    #[error("inference fault: {message}")]
    Inference {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Publish timed out or the endpoint refused the sample. The sample is dropped.
    #[error("transport fault: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Detection unusable for geometry. The frame is skipped.
    #[error("data fault: {message}")]
    Data { message: String },

    /// Writing buffered samples to disk failed.
    #[error("persist fault: {message}")]
    Persist {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A stage panicked. Ends the session after draining.
    #[error("unexpected fault: {message}")]
    Unexpected { message: String },
}

impl PipelineFault {
    pub fn capture(message: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineFault::Capture {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn inference(message: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineFault::Inference {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn transport(message: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineFault::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        PipelineFault::Data {
            message: message.into(),
        }
    }

    pub fn persist(message: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineFault::Persist {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineFault::Config {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        PipelineFault::Unexpected {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineFault::Capture { .. } => "capture",
            PipelineFault::Inference { .. } => "inference",
            PipelineFault::Transport { .. } => "transport",
            PipelineFault::Data { .. } => "data",
            PipelineFault::Persist { .. } => "persist",
            PipelineFault::Config { .. } => "config",
            PipelineFault::Unexpected { .. } => "unexpected",
        }
    }
}
