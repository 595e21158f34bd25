pub mod acquire;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod remediate;
pub mod scan;
pub mod tools;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{BatchCounters, BatchReport, BatchRunner, CopyResult, TaskState};
pub use cancel::CancellationFlag;
pub use config::FixerConfig;
pub use detector::{DetectionOutcome, Detector, Verdict};
pub use error::{FixerError, Result};
pub use events::{EventLog, LogEntry, LogLevel, ProgressUpdate};
pub use remediate::{RemediationResult, Remediator};
pub use scan::FileTask;
pub use tools::{FfmpegTranscoder, ToolPaths, Transcoder};
