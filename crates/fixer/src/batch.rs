use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use crate::cancel::CancellationFlag;
use crate::config::FixerConfig;
use crate::detector::{DetectionOutcome, Detector};
use crate::error::{FixerError, Result};
use crate::events::{EventLog, ProgressUpdate};
use crate::remediate::{discard, RemediationResult, Remediator};
use crate::scan::{find_target_files, FileTask};
use crate::tools::Transcoder;

const COPY_CHUNK_BYTES: usize = 1024 * 1024;

/// Running totals for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounters {
    pub fixed: usize,
    pub copied: usize,
    pub failed: usize,
}

impl BatchCounters {
    pub fn total(&self) -> usize {
        self.fixed + self.copied + self.failed
    }
}

/// Lifecycle of one file within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Detecting,
    Remediating,
    Copying,
    Fixed,
    Copied,
    Failed,
    /// Cancelled before detection began, or while copying
    Abandoned,
}

impl TaskState {
    /// Forward-only transitions
    pub fn can_advance_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Detecting)
                | (Pending, Remediating)
                | (Pending, Abandoned)
                | (Pending, Failed)
                | (Detecting, Remediating)
                | (Detecting, Copying)
                | (Remediating, Fixed)
                | (Remediating, Failed)
                | (Copying, Copied)
                | (Copying, Failed)
                | (Copying, Abandoned)
        )
    }
}

/// Outcome of the plain copy used for files that need no remux
#[derive(Debug)]
pub enum CopyResult {
    Copied(PathBuf),
    Failed(FixerError),
}

/// How a batch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub counters: BatchCounters,
    /// Stopped by the cancellation flag before every file was processed
    pub cancelled: bool,
    pub output_dir: PathBuf,
}

impl BatchReport {
    /// Per-file failures do not make a batch unsuccessful; cancellation does
    pub fn is_success(&self) -> bool {
        !self.cancelled
    }
}

/// Byte-for-byte copy in fixed chunks, checking `cancel` between chunks.
/// Permissions and modification time follow the source. A copy that does not
/// finish leaves nothing at `dst`.
pub fn copy_file(src: &Path, dst: &Path, cancel: &CancellationFlag, log: &EventLog) -> CopyResult {
    match copy_chunked(src, dst, cancel) {
        Ok(()) => CopyResult::Copied(dst.to_path_buf()),
        Err(e) => {
            log.debug(format!("copy of {} stopped: {}", src.display(), e));
            discard(dst, log);
            CopyResult::Failed(e)
        }
    }
}

fn copy_chunked(src: &Path, dst: &Path, cancel: &CancellationFlag) -> Result<()> {
    let wrap = |source: std::io::Error| FixerError::Copy {
        path: dst.to_path_buf(),
        source,
    };

    let mut reader = File::open(src).map_err(wrap)?;
    let meta = reader.metadata().map_err(wrap)?;
    let mut writer = File::create(dst).map_err(wrap)?;
    let mut buf = vec![0u8; COPY_CHUNK_BYTES];

    loop {
        if cancel.is_cancelled() {
            return Err(FixerError::Cancelled);
        }
        let n = reader.read(&mut buf).map_err(wrap)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).map_err(wrap)?;
    }

    writer.flush().map_err(wrap)?;
    if let Ok(modified) = meta.modified() {
        writer.set_modified(modified).map_err(wrap)?;
    }
    drop(writer);
    std::fs::set_permissions(dst, meta.permissions()).map_err(wrap)?;
    Ok(())
}

/// True when `a` and `b` name the same file on disk. A missing path never
/// matches.
fn same_file(a: &Path, b: &Path) -> bool {
    if let (Ok(x), Ok(y)) = (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        if x == y {
            return true;
        }
    }
    // Hard links resolve to different paths.
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(x), Ok(y)) = (std::fs::metadata(a), std::fs::metadata(b)) {
            return x.dev() == y.dev() && x.ino() == y.ino();
        }
    }
    false
}

enum FileOutcome {
    Fixed,
    Copied,
    Failed(FixerError),
    Abandoned,
}

/// Drives every target file in a directory through detection and remux.
///
/// Files are handled one at a time in scan order. The runner owns all
/// writes to the output directory for the duration of a batch.
pub struct BatchRunner<T: Transcoder> {
    transcoder: T,
    config: FixerConfig,
    log: Arc<EventLog>,
    cancel: CancellationFlag,
    progress: Option<UnboundedSender<ProgressUpdate>>,
    tool_version: Option<String>,
}

impl<T: Transcoder> BatchRunner<T> {
    pub fn new(transcoder: T, config: FixerConfig, log: Arc<EventLog>, cancel: CancellationFlag) -> Self {
        Self {
            transcoder,
            config,
            log,
            cancel,
            progress: None,
            tool_version: None,
        }
    }

    /// Send a progress update before each file
    pub fn with_progress(mut self, progress: UnboundedSender<ProgressUpdate>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Version string named in the opening log line
    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = Some(version.into());
        self
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    /// Process every target file directly inside `input_dir` into `output_dir`.
    ///
    /// Returns `Err` only when the batch cannot start: the input directory is
    /// unreadable or the output directory cannot be created. Per-file failures
    /// are counted; cancellation is reported in the returned report.
    pub async fn run_batch(&self, input_dir: &Path, output_dir: &Path, skip_detection: bool) -> Result<BatchReport> {
        self.log.info(format!(
            "moovfix {} using {}",
            env!("CARGO_PKG_VERSION"),
            self.tool_version.as_deref().unwrap_or("unknown ffmpeg version")
        ));
        if skip_detection {
            self.log
                .info("Detection skipped: every file will be remuxed");
        }

        if let Err(e) = std::fs::create_dir_all(output_dir) {
            self.log.error(format!(
                "Cannot create output directory {}: {}",
                output_dir.display(),
                e
            ));
            return Err(e.into());
        }
        if let (Ok(input), Ok(output)) = (std::fs::canonicalize(input_dir), std::fs::canonicalize(output_dir)) {
            if input == output {
                let msg = format!("output directory {} is the input directory", output_dir.display());
                self.log.error(format!("Cannot start: {}", msg));
                return Err(FixerError::Config(msg));
            }
        }

        let tasks = match find_target_files(input_dir, &self.config.target_extension) {
            Ok(tasks) => tasks,
            Err(e) => {
                self.log
                    .error(format!("Cannot read input directory {}: {}", input_dir.display(), e));
                return Err(e);
            }
        };

        let mut report = BatchReport {
            counters: BatchCounters::default(),
            cancelled: false,
            output_dir: output_dir.to_path_buf(),
        };

        if tasks.is_empty() {
            self.log.warning(format!(
                "No .{} files found in {}",
                self.config.target_extension,
                input_dir.display()
            ));
            self.send_progress(100.0, "No files to process");
            return Ok(report);
        }

        let total = tasks.len();
        self.log.info(format!("Found {} files to process", total));

        for (index, task) in tasks.iter().enumerate() {
            let name = task.display_name();
            let mut state = TaskState::Pending;

            if self.cancel.is_cancelled() {
                self.advance(&name, &mut state, TaskState::Abandoned);
                self.log.warning(format!(
                    "Processing cancelled: {} of {} files not started",
                    total - index,
                    total
                ));
                report.cancelled = true;
                return Ok(report);
            }

            self.send_progress(
                (index + 1) as f64 / total as f64 * 100.0,
                format!("Processing {} ({}/{})", name, index + 1, total),
            );
            self.log
                .info(format!("Processing ({}/{}): {}", index + 1, total, name));

            let dest = output_dir.join(task.path.file_name().unwrap_or_default());
            match self.process(task, &dest, skip_detection, &mut state).await {
                FileOutcome::Fixed => {
                    report.counters.fixed += 1;
                    self.log.success(format!("✅ Fixed: {}", name));
                }
                FileOutcome::Copied => {
                    report.counters.copied += 1;
                    self.log
                        .success(format!("✅ Copied (already optimized): {}", name));
                }
                FileOutcome::Failed(e) => {
                    report.counters.failed += 1;
                    self.log.error(format!("❌ Failed: {}: {}", name, e));
                }
                FileOutcome::Abandoned => {
                    self.log.warning(format!(
                        "Processing cancelled during {}: {} of {} files not finished",
                        name,
                        total - index,
                        total
                    ));
                    report.cancelled = true;
                    return Ok(report);
                }
            }
        }

        let c = report.counters;
        self.log.info(format!(
            "Summary: {} fixed, {} copied, {} failed",
            c.fixed, c.copied, c.failed
        ));
        self.log
            .info(format!("Output directory: {}", output_dir.display()));
        self.send_progress(100.0, "Done");
        Ok(report)
    }

    async fn process(&self, task: &FileTask, dest: &Path, skip_detection: bool, state: &mut TaskState) -> FileOutcome {
        let name = task.display_name();

        // Neither the remux nor the copy may open the source for writing.
        if same_file(&task.path, dest) {
            self.advance(&name, state, TaskState::Failed);
            return FileOutcome::Failed(FixerError::OutputIsSource(dest.to_path_buf()));
        }

        let outcome = if skip_detection {
            DetectionOutcome::NeedsRemediation
        } else {
            self.advance(&name, state, TaskState::Detecting);
            Detector::new(&self.transcoder, &self.config, &self.log)
                .detect(task)
                .await
        };

        match outcome {
            DetectionOutcome::NeedsRemediation => {
                self.advance(&name, state, TaskState::Remediating);
                match Remediator::new(&self.transcoder, &self.config, &self.log)
                    .remediate(&task.path, dest)
                    .await
                {
                    RemediationResult::Fixed(_) => {
                        self.advance(&name, state, TaskState::Fixed);
                        FileOutcome::Fixed
                    }
                    RemediationResult::Failed(e) => {
                        self.advance(&name, state, TaskState::Failed);
                        FileOutcome::Failed(e)
                    }
                }
            }
            DetectionOutcome::AlreadyOptimized => {
                self.advance(&name, state, TaskState::Copying);
                match copy_file(&task.path, dest, &self.cancel, &self.log) {
                    CopyResult::Copied(_) => {
                        self.advance(&name, state, TaskState::Copied);
                        FileOutcome::Copied
                    }
                    CopyResult::Failed(e) if e.is_fatal() => {
                        self.advance(&name, state, TaskState::Abandoned);
                        FileOutcome::Abandoned
                    }
                    CopyResult::Failed(e) => {
                        self.advance(&name, state, TaskState::Failed);
                        FileOutcome::Failed(e)
                    }
                }
            }
        }
    }

    fn advance(&self, name: &str, state: &mut TaskState, next: TaskState) {
        if !state.can_advance_to(next) {
            self.log
                .debug(format!("{}: unexpected transition {:?} -> {:?}", name, state, next));
        }
        self.log.debug(format!("{}: {:?} -> {:?}", name, state, next));
        *state = next;
    }

    fn send_progress(&self, percent: f64, status: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressUpdate {
                percent,
                status: status.into(),
            });
        }
    }
}
