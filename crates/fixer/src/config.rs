use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a moov relocation batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixerConfig {
    /// Name of the output directory, created inside the input directory
    pub output_dir_name: String,
    /// Remux every file without running placement detection
    pub skip_detection: bool,
    /// Container extension to pick up from the input directory (case-insensitive)
    pub target_extension: String,
    /// Explicit ffmpeg path; bypasses the search when set
    pub ffmpeg_bin: Option<PathBuf>,
    /// Explicit ffprobe path; bypasses the search when set
    pub ffprobe_bin: Option<PathBuf>,
    /// Hard wall-clock limit for one remux
    pub remux_timeout_secs: u64,
    /// Limit for a trace-mode probe
    pub trace_timeout_secs: u64,
    /// Limit for the simplified probe retried after a trace timeout
    pub trace_retry_timeout_secs: u64,
    /// moov offset (percent of file size) above which moov is trailing
    pub trailing_threshold_percent: f64,
    /// moov offset (percent of file size) below which moov is leading
    pub leading_threshold_percent: f64,
    /// Bytes read from the end of a file by the raw tail scan
    pub tail_scan_bytes: u64,
    /// Size change of a throwaway remux that counts as a structural change
    pub probe_size_delta_percent: f64,
    /// Largest size change tolerated between input and remuxed output
    pub max_size_delta_percent: f64,
    /// Characters of ffmpeg stderr kept in failure reports
    pub stderr_excerpt_chars: usize,
    /// Directory for the throwaway remux probe (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
    /// Where to fetch ffmpeg from when none is installed
    pub download_url: Option<String>,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl FixerConfig {
    /// Create a default configuration with the empirically tuned values
    pub fn default_config() -> Self {
        Self {
            output_dir_name: "processed_videos".to_string(),
            skip_detection: false,
            target_extension: "mp4".to_string(),
            ffmpeg_bin: None,
            ffprobe_bin: None,
            remux_timeout_secs: 120,
            trace_timeout_secs: 30,
            trace_retry_timeout_secs: 15,
            trailing_threshold_percent: 90.0,
            leading_threshold_percent: 10.0,
            tail_scan_bytes: 10 * 1024,
            probe_size_delta_percent: 1.0,
            max_size_delta_percent: 10.0,
            stderr_excerpt_chars: 500,
            scratch_dir: None,
            download_url: None,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject threshold combinations the detector cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.leading_threshold_percent >= self.trailing_threshold_percent {
            anyhow::bail!(
                "leading threshold ({}) must be below trailing threshold ({})",
                self.leading_threshold_percent,
                self.trailing_threshold_percent
            );
        }
        if self.target_extension.trim().is_empty() {
            anyhow::bail!("target extension must not be empty");
        }
        if self.remux_timeout_secs == 0 {
            anyhow::bail!("remux timeout must be at least one second");
        }
        Ok(())
    }

    pub fn remux_timeout(&self) -> Duration {
        Duration::from_secs(self.remux_timeout_secs)
    }

    pub fn trace_timeout(&self) -> Duration {
        Duration::from_secs(self.trace_timeout_secs)
    }

    pub fn trace_retry_timeout(&self) -> Duration {
        Duration::from_secs(self.trace_retry_timeout_secs)
    }

    /// Directory for throwaway probe output
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Output directory for a given input directory
    pub fn output_dir(&self, input_dir: &Path) -> PathBuf {
        input_dir.join(&self.output_dir_name)
    }
}
