use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use reqwest::blocking::Client;

use crate::{error::PipelineFault, types::AngleRecord};

/// Delivers processed samples downstream.
pub trait Publisher {
    /// Hands one record downstream. A `Transport` error means the record was
    /// dropped; the caller keeps going.
    fn publish(&mut self, record: &AngleRecord) -> Result<(), PipelineFault>;

    /// Called once when the session drains.
    fn finish(&mut self) -> Result<(), PipelineFault>;
}

/// Posts every record as JSON to an HTTP endpoint, bounded by a short
/// timeout. Nothing is retried.
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Publisher for HttpPublisher {
    fn publish(&mut self, record: &AngleRecord) -> Result<(), PipelineFault> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .map_err(|err| {
                let reason = if err.is_timeout() {
                    "publish timed out"
                } else {
                    "publish failed"
                };
                PipelineFault::transport(reason, err.into())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineFault::transport(
                "endpoint rejected sample",
                anyhow!("{} returned {status}", self.endpoint),
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineFault> {
        Ok(())
    }
}

/// Buffers records in memory and writes them to disk once, when the
/// session drains.
#[derive(Debug)]
pub struct RecordingPublisher {
    output: PathBuf,
    records: Vec<AngleRecord>,
    flushed: bool,
}

impl RecordingPublisher {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            records: Vec::new(),
            flushed: false,
        }
    }

    pub fn records(&self) -> &[AngleRecord] {
        &self.records
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, record: &AngleRecord) -> Result<(), PipelineFault> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), PipelineFault> {
        if self.flushed {
            return Ok(());
        }
        // Marked before writing: a failed flush is reported, never retried.
        self.flushed = true;
        write_records_atomically(&self.output, &self.records).map_err(|err| {
            PipelineFault::persist(
                format!("failed to write {} samples", self.records.len()),
                err,
            )
        })?;
        log::info!(
            "wrote {} samples to {}",
            self.records.len(),
            self.output.display()
        );
        Ok(())
    }
}

/// Writes the records as a JSON array next to `dest`, then moves it into place.
pub fn write_records_atomically(dest: &Path, records: &[AngleRecord]) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_vec_pretty(records).context("failed to serialize samples")?;
    let tmp_path = staging_path(dest);
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(&json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// `dest` with `.tmp` appended, so it never collides with `dest` itself.
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn read_records(path: &Path) -> anyhow::Result<Vec<AngleRecord>> {
    let content =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("failed to parse {}", path.display()))
}
