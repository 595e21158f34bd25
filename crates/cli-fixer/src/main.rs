use anyhow::{Context, Result};
use clap::Parser;
use fixer::{
    acquire, BatchReport, BatchRunner, CancellationFlag, EventLog, FfmpegTranscoder, FixerConfig,
    ProgressUpdate,
};
use std::path::PathBuf;
use std::sync::Arc;
use log::{error, info, warn};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Move the moov atom of MP4 files to the front so they stream progressively
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the videos (defaults to the current directory)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Name of the output directory, created inside the input directory
    #[arg(short, long)]
    output: Option<String>,

    /// Remux every file without checking where moov is
    #[arg(short, long)]
    skip_detection: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the full log, DEBUG entries included, to this file when done
    #[arg(long)]
    export_log: Option<PathBuf>,

    /// Fail instead of downloading ffmpeg when it is not installed
    #[arg(long)]
    no_download: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

struct Job {
    config: FixerConfig,
    input_dir: PathBuf,
    output_dir: PathBuf,
    allow_download: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    let mut cfg = FixerConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(name) = &args.output {
        cfg.output_dir_name = name.clone();
    }
    if args.skip_detection {
        cfg.skip_detection = true;
    }

    let input_dir = match &args.input {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let output_dir = cfg.output_dir(&input_dir);
    info!("Input: {}, output: {}", input_dir.display(), output_dir.display());

    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let log = Arc::new(EventLog::with_sink(log_tx));
    let cancel = CancellationFlag::new();

    let ctrl_c_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling after the current step...");
            ctrl_c_flag.cancel();
        }
    });

    let job = Job {
        config: cfg,
        input_dir,
        output_dir,
        allow_download: !args.no_download,
    };
    let mut worker = tokio::spawn(run(job, Arc::clone(&log), cancel, progress_tx));

    let outcome = loop {
        tokio::select! {
            Some(line) = log_rx.recv() => println!("{}", line),
            Some(update) = progress_rx.recv() => {
                eprintln!("[{:>5.1}%] {}", update.percent, update.status);
            }
            joined = &mut worker => break joined,
        }
    };
    while let Ok(line) = log_rx.try_recv() {
        println!("{}", line);
    }

    let exit_code = match outcome {
        Ok(Ok(report)) if report.is_success() => 0,
        Ok(Ok(report)) => {
            warn!(
                "Batch cancelled with {} files processed",
                report.counters.total()
            );
            1
        }
        Ok(Err(e)) => {
            error!("❌ {}", e);
            1
        }
        Err(e) => {
            error!("❌ Worker task failed: {}", e);
            1
        }
    };

    if let Some(path) = &args.export_log {
        log.export(path)
            .with_context(|| format!("Failed to export log to {}", path.display()))?;
        println!("Log written to {}", path.display());
    }

    std::process::exit(exit_code);
}

/// Background worker: resolve ffmpeg, then run the batch
async fn run(
    job: Job,
    log: Arc<EventLog>,
    cancel: CancellationFlag,
    progress: UnboundedSender<ProgressUpdate>,
) -> fixer::Result<BatchReport> {
    let search_root = std::env::current_dir().unwrap_or_else(|_| job.input_dir.clone());
    let paths = acquire::ensure_transcoder(
        &job.config,
        &search_root,
        job.allow_download,
        &cancel,
        Some(&progress),
        &log,
    )
    .await?;

    let transcoder = FfmpegTranscoder::new(paths, &job.config);
    let version = match transcoder.version().await {
        Ok(v) if !v.is_empty() => v,
        Ok(_) => "unknown ffmpeg version".to_string(),
        Err(e) => {
            warn!("Could not read ffmpeg version: {}", e);
            "unknown ffmpeg version".to_string()
        }
    };

    let skip_detection = job.config.skip_detection;
    let runner = BatchRunner::new(transcoder, job.config, log, cancel)
        .with_progress(progress)
        .with_tool_version(version);
    runner
        .run_batch(&job.input_dir, &job.output_dir, skip_detection)
        .await
}
