//! Turns a live camera feed of a person into smoothed, bounded arm joint
//! angles and streams or records them for a remote actuator.

pub mod config;
pub mod error;
pub mod model_download;
pub mod pipeline;
pub mod types;

pub use config::{Config, Invocation};
pub use error::PipelineFault;
