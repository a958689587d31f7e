use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// Where a model lives on disk, and optionally where to fetch it from when
/// it is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSource {
    pub path: PathBuf,
    pub url: Option<String>,
}

impl ModelSource {
    pub fn local(path: PathBuf) -> Self {
        Self { path, url: None }
    }
}

#[derive(Clone, Debug)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

/// Makes sure `source.path` exists, downloading it from `source.url` when
/// needed. Fails if the file is absent and no URL is configured.
pub fn ensure_model_ready(source: &ModelSource, label: &str) -> anyhow::Result<()> {
    let mut progress: Option<ProgressBar> = None;
    ensure_model_ready_with(source, label, |event| match event {
        ModelDownloadEvent::Started { total } => {
            progress = Some(create_progress_bar(total));
        }
        ModelDownloadEvent::Progress { downloaded, .. } => {
            if let Some(pb) = progress.as_ref() {
                pb.set_position(downloaded);
            }
        }
        ModelDownloadEvent::Finished => {
            if let Some(pb) = progress.take() {
                pb.finish_with_message(format!("{label} model ready"));
            }
        }
        ModelDownloadEvent::AlreadyPresent => {}
    })
}

pub fn ensure_model_ready_with<F>(
    source: &ModelSource,
    label: &str,
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if source.path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent);
        return Ok(());
    }

    let Some(url) = source.url.as_deref() else {
        return Err(anyhow!(
            "{label} model not found at {} and no download URL configured",
            source.path.display()
        ));
    };

    if let Some(parent) = source.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create model directory {}", parent.display())
            })?;
        }
    }

    download_to_path(label, url, &source.path, &mut on_event)
}

fn download_to_path<F>(label: &str, url: &str, dest: &Path, on_event: &mut F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!("downloading {label} model from {url} to {}", dest.display());

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started { total: total_size });

    let mut tmp_path = dest.as_os_str().to_owned();
    tmp_path.push(".download");
    let tmp_path = PathBuf::from(tmp_path);
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished);
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
