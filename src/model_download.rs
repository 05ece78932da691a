use std::{
    fs,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

/// Environment variable consulted by the replay binary for the classifier
/// download location.
pub const CLASSIFIER_MODEL_URL_ENV: &str = "SIGN_STREAM_MODEL_URL";

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

/// Makes sure the sign classifier exists at `model_path`, fetching it from
/// `url` when missing. A terminal progress bar follows the download.
pub fn ensure_classifier_model_ready<F>(
    model_path: &Path,
    url: Option<&str>,
    mut on_event: F,
) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent);
        on_event(ModelDownloadEvent::Finished);
        return Ok(());
    }

    let Some(url) = url else {
        return Err(anyhow!(
            "sign classifier not found at {} and no download URL configured (set {})",
            model_path.display(),
            CLASSIFIER_MODEL_URL_ENV
        ));
    };

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(url, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message("sign classifier ready");
                }
            }
            ModelDownloadEvent::AlreadyPresent => {}
        }
        on_event(event);
    })
    .with_context(|| {
        format!(
            "failed to download sign classifier to {}",
            model_path.display()
        )
    })
}

fn download_to_path<F>(url: &str, dest: &Path, on_event: &mut F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!("downloading sign classifier from {url} to {}", dest.display());

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total = response.content_length();
    on_event(ModelDownloadEvent::Started { total });

    // Written beside the target and renamed, so a half-finished file is
    // never mistaken for a model.
    let tmp_path = dest.with_extension("download");
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
        on_event(ModelDownloadEvent::Progress { downloaded, total });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished);
    Ok(())
}

fn create_progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .map(|style| style.progress_chars("=>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading sign classifier")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
