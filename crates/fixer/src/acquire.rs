use std::path::{Path, PathBuf};
use humansize::{format_size, DECIMAL};
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use crate::cancel::CancellationFlag;
use crate::config::FixerConfig;
use crate::error::{FixerError, Result};
use crate::events::{EventLog, ProgressUpdate};
use crate::remediate::discard;
use crate::tools::{exe_name, make_executable, ToolPaths};

/// Static single-binary macOS build
pub const MACOS_STATIC_URL: &str = "https://evermeet.cx/ffmpeg/getrelease/darwin64/static/ffmpeg";

/// Download location for this platform, if there is a plain binary to fetch
pub fn default_download_url() -> Option<&'static str> {
    if cfg!(target_os = "macos") {
        Some(MACOS_STATIC_URL)
    } else {
        None
    }
}

/// Stream `url` into `dest_dir/ffmpeg`, reporting progress and stopping
/// between chunks when `cancel` is set. Nothing is left behind on failure.
pub async fn download_transcoder(
    url: &str,
    dest_dir: &Path,
    cancel: &CancellationFlag,
    progress: Option<&UnboundedSender<ProgressUpdate>>,
    log: &EventLog,
) -> Result<PathBuf> {
    if cancel.is_cancelled() {
        return Err(FixerError::Cancelled);
    }
    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(exe_name("ffmpeg"));

    match fetch(url, &dest, cancel, progress, log).await {
        Ok(bytes) => {
            make_executable(&dest);
            log.info(format!(
                "Downloaded ffmpeg ({}) to {}",
                format_size(bytes, DECIMAL),
                dest.display()
            ));
            Ok(dest)
        }
        Err(e) => {
            discard(&dest, log);
            Err(e)
        }
    }
}

async fn fetch(
    url: &str,
    dest: &Path,
    cancel: &CancellationFlag,
    progress: Option<&UnboundedSender<ProgressUpdate>>,
    log: &EventLog,
) -> Result<u64> {
    let failed = |e: reqwest::Error| FixerError::Acquisition(format!("download from {} failed: {}", url, e));

    info!("Downloading ffmpeg from {}", url);
    let mut response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(failed)?;

    let total = response.content_length().unwrap_or(0);
    log.info(format!("Downloading ffmpeg ({})...", format_size(total, DECIMAL)));

    let mut file = tokio::fs::File::create(dest).await?;
    let mut downloaded = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(failed)? {
        if cancel.is_cancelled() {
            return Err(FixerError::Cancelled);
        }
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        if total > 0 {
            if let Some(tx) = progress {
                let _ = tx.send(ProgressUpdate {
                    percent: downloaded as f64 / total as f64 * 100.0,
                    status: format!(
                        "Downloading ffmpeg: {} / {}",
                        format_size(downloaded, DECIMAL),
                        format_size(total, DECIMAL)
                    ),
                });
            }
        }
    }
    file.flush().await?;
    debug!("Download finished: {} bytes", downloaded);
    Ok(downloaded)
}

/// Resolve ffmpeg, downloading it below `search_root` when it is missing and
/// `allow_download` is set. Failure here stops the batch before it starts.
pub async fn ensure_transcoder(
    config: &FixerConfig,
    search_root: &Path,
    allow_download: bool,
    cancel: &CancellationFlag,
    progress: Option<&UnboundedSender<ProgressUpdate>>,
    log: &EventLog,
) -> Result<ToolPaths> {
    if let Some(paths) = ToolPaths::locate(config, search_root) {
        return Ok(paths);
    }

    let result = acquire(config, search_root, allow_download, cancel, progress, log).await;
    if let Err(e) = &result {
        log.error(e.to_string());
    }
    result
}

async fn acquire(
    config: &FixerConfig,
    search_root: &Path,
    allow_download: bool,
    cancel: &CancellationFlag,
    progress: Option<&UnboundedSender<ProgressUpdate>>,
    log: &EventLog,
) -> Result<ToolPaths> {
    if !allow_download {
        return Err(FixerError::Acquisition(
            "ffmpeg not found; install it or set ffmpeg_bin in the config".to_string(),
        ));
    }

    let url = config
        .download_url
        .clone()
        .or_else(|| default_download_url().map(String::from))
        .ok_or_else(|| {
            FixerError::Acquisition(
                "ffmpeg not found and no download is available for this platform; install it with your package manager (e.g. apt-get install ffmpeg)".to_string(),
            )
        })?;

    log.info("ffmpeg not found, downloading...");
    let dest_dir = search_root.join("ffmpeg").join("bin");
    download_transcoder(&url, &dest_dir, cancel, progress, log)
        .await
        .map_err(|e| match e {
            FixerError::Cancelled | FixerError::Acquisition(_) => e,
            other => FixerError::Acquisition(other.to_string()),
        })?;

    ToolPaths::locate(config, search_root).ok_or_else(|| {
        FixerError::Acquisition(format!(
            "downloaded ffmpeg not usable in {}",
            dest_dir.display()
        ))
    })
}
