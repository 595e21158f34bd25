use std::path::{Path, PathBuf};
use humansize::{format_size, DECIMAL};
use crate::config::FixerConfig;
use crate::error::{FixerError, Result};
use crate::events::EventLog;
use crate::tools::Transcoder;

/// Terminal outcome of a remux attempt
#[derive(Debug)]
pub enum RemediationResult {
    Fixed(PathBuf),
    Failed(FixerError),
}

/// Percentage size change from `input` to `output`.
/// An empty input counts as unchanged only when the output is empty too.
pub fn size_delta_percent(input: u64, output: u64) -> f64 {
    if input == 0 {
        return if output == 0 { 0.0 } else { f64::INFINITY };
    }
    input.abs_diff(output) as f64 / input as f64 * 100.0
}

/// First `max_chars` characters of tool output
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Remove a failed output if there is one
pub(crate) fn discard(path: &Path, log: &EventLog) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => log.debug(format!("removed incomplete output {}", path.display())),
        Err(e) => log.warning(format!("could not remove incomplete output {}: {}", path.display(), e)),
    }
}

/// Moves moov to the front through the transcoder and vets the result
pub struct Remediator<'a, T: Transcoder + ?Sized> {
    transcoder: &'a T,
    config: &'a FixerConfig,
    log: &'a EventLog,
}

impl<'a, T: Transcoder + ?Sized> Remediator<'a, T> {
    pub fn new(transcoder: &'a T, config: &'a FixerConfig, log: &'a EventLog) -> Self {
        Self {
            transcoder,
            config,
            log,
        }
    }

    /// Remux `input` into `output`. On every failure path `output` is gone
    /// when this returns.
    pub async fn remediate(&self, input: &Path, output: &Path) -> RemediationResult {
        match self.try_remediate(input, output).await {
            Ok(()) => RemediationResult::Fixed(output.to_path_buf()),
            Err(e) => {
                self.log
                    .debug(format!("remux of {} failed: {}", input.display(), e));
                discard(output, self.log);
                RemediationResult::Failed(e)
            }
        }
    }

    async fn try_remediate(&self, input: &Path, output: &Path) -> Result<()> {
        let input_size = std::fs::metadata(input)?.len();

        let out = match self
            .transcoder
            .remux(input, output, self.config.remux_timeout())
            .await
        {
            Err(FixerError::ToolTimeout { secs, .. }) => {
                return Err(FixerError::RemediationTimeout { secs })
            }
            other => other?,
        };

        if !out.success() {
            return Err(FixerError::RemediationProcess {
                exit_code: out.exit_code.unwrap_or(-1),
                stderr: excerpt(&out.stderr, self.config.stderr_excerpt_chars),
            });
        }

        let output_size = match std::fs::metadata(output) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(FixerError::RemediationValidation(
                    "output file was not created".to_string(),
                ))
            }
        };
        if output_size == 0 {
            return Err(FixerError::RemediationValidation(
                "output file is empty".to_string(),
            ));
        }

        let delta = size_delta_percent(input_size, output_size);
        if delta > self.config.max_size_delta_percent {
            return Err(FixerError::RemediationValidation(format!(
                "size changed by {:.1}% ({} -> {} bytes)",
                delta, input_size, output_size
            )));
        }

        self.log.info(format!(
            "remuxed {}: {} -> {} ({:.2}% change)",
            input.file_name().unwrap_or_default().to_string_lossy(),
            format_size(input_size, DECIMAL),
            format_size(output_size, DECIMAL),
            delta
        ));
        Ok(())
    }
}
