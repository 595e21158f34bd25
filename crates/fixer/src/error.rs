use std::path::PathBuf;
use thiserror::Error;

/// Failures the pipeline can report.
///
/// Per-file variants (`Remediation*`, `Copy`, tool errors) are converted into a
/// `Failed` outcome by the batch runner. `Acquisition` and `Cancelled` stop a
/// batch outright.
#[derive(Error, Debug)]
pub enum FixerError {
    #[error("ffmpeg unavailable: {0}")]
    Acquisition(String),

    #[error("failed to start {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {secs} seconds")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("remux timed out after {secs} seconds")]
    RemediationTimeout { secs: u64 },

    #[error("ffmpeg exited with code {exit_code}: {stderr}")]
    RemediationProcess { exit_code: i32, stderr: String },

    #[error("output rejected: {0}")]
    RemediationValidation(String),

    #[error("copy to {path} failed: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output {0} is the source file")]
    OutputIsSource(PathBuf),

    #[error("processing cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixerError {
    /// True for conditions that abort the whole batch rather than one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FixerError::Acquisition(_) | FixerError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, FixerError>;
