use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use walkdir::WalkDir;
use crate::config::FixerConfig;
use crate::error::{FixerError, Result};

/// Captured result of one external tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr; trace output may land on either
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }
}

/// Process boundary used by the detector and the remediator.
///
/// Every method blocks the calling task for the duration of one subprocess.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// ffprobe trace dump of container parsing. `Ok(None)` when no prober is installed.
    async fn probe_trace(&self, input: &Path) -> Result<Option<String>>;

    /// Value of the container's `encoder` tag. `Ok(None)` when no prober is installed.
    async fn encoder_tag(&self, input: &Path) -> Result<Option<String>>;

    /// ffmpeg's own trace output (stderr) for the input
    async fn transcoder_trace(&self, input: &Path) -> Result<String>;

    /// Stream-copy every track into `output` with moov moved to the front.
    /// A non-zero exit is reported in the returned output, not as an error.
    async fn remux(&self, input: &Path, output: &Path, timeout: Duration) -> Result<ToolOutput>;
}

/// Run a tool to completion, killing it if it outlives `limit`
pub async fn run_tool(bin: &Path, args: &[OsString], limit: Duration) -> Result<ToolOutput> {
    let tool = tool_label(bin);
    debug!(
        "Executing {}: {} {}",
        tool,
        bin.display(),
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    );

    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    {
        // CREATE_NO_WINDOW
        cmd.creation_flags(0x0800_0000);
    }

    let mut child = cmd.spawn().map_err(|source| FixerError::ToolSpawn {
        tool: tool.clone(),
        source,
    })?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain both pipes concurrently so a chatty trace cannot fill one and stall the child.
    let stdout_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_handle = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill stuck {} process: {}", tool, e);
            }
            stdout_handle.abort();
            stderr_handle.abort();
            return Err(FixerError::ToolTimeout {
                tool,
                secs: limit.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();

    let output = ToolOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };
    debug!(
        "{} exit code: {:?}, stdout length: {}, stderr length: {}",
        tool,
        output.exit_code,
        output.stdout.len(),
        output.stderr.len()
    );
    Ok(output)
}

fn tool_label(bin: &Path) -> String {
    bin.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| bin.display().to_string())
}

fn os_args(parts: &[&OsStr]) -> Vec<OsString> {
    parts.iter().map(|p| p.to_os_string()).collect()
}

/// Platform executable name for a tool
pub fn exe_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

/// Resolved locations of ffmpeg and (optionally) ffprobe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve ffmpeg: explicit config, then PATH, then local copies below `search_root`.
    /// ffprobe is taken from config, next to ffmpeg, or PATH, in that order.
    pub fn locate(config: &FixerConfig, search_root: &Path) -> Option<Self> {
        let configured = config.ffmpeg_bin.clone().filter(|p| {
            let exists = p.exists();
            if !exists {
                warn!("Configured ffmpeg not found: {}", p.display());
            }
            exists
        });

        let ffmpeg = configured
            .or_else(|| which::which(exe_name("ffmpeg")).ok())
            .or_else(|| find_local_tool(search_root, "ffmpeg"))?;

        let ffprobe = config
            .ffprobe_bin
            .clone()
            .filter(|p| p.exists())
            .or_else(|| sibling_tool(&ffmpeg, "ffprobe"))
            .or_else(|| which::which(exe_name("ffprobe")).ok());

        info!(
            "Using ffmpeg at {} (ffprobe: {})",
            ffmpeg.display(),
            ffprobe
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not found".to_string())
        );

        Some(ToolPaths { ffmpeg, ffprobe })
    }
}

fn sibling_tool(anchor: &Path, tool: &str) -> Option<PathBuf> {
    let candidate = anchor.parent()?.join(exe_name(tool));
    candidate.is_file().then_some(candidate)
}

/// Look for a locally unpacked tool under `root`: the usual archive layouts
/// first, then any matching file inside a directory whose name mentions ffmpeg.
pub fn find_local_tool(root: &Path, tool: &str) -> Option<PathBuf> {
    let exe = exe_name(tool);

    let mut candidates = vec![
        root.join("ffmpeg").join(&exe),
        root.join("ffmpeg").join("bin").join(&exe),
    ];
    if let Ok(entries) = std::fs::read_dir(root) {
        let mut versioned: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("ffmpeg-"))
            .map(|e| e.path().join("bin").join(&exe))
            .collect();
        versioned.sort();
        candidates.extend(versioned);
    }

    if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
        make_executable(&found);
        return Some(found);
    }

    for entry in WalkDir::new(root)
        .max_depth(4)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != OsStr::new(&exe) {
            continue;
        }
        let in_ffmpeg_dir = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(|rel| rel.parent())
            .map(|dir| dir.to_string_lossy().to_lowercase().contains("ffmpeg"))
            .unwrap_or(false);
        if in_ffmpeg_dir {
            make_executable(entry.path());
            return Some(entry.path().to_path_buf());
        }
    }

    None
}

/// Best effort: downloaded or unzipped binaries often lack the execute bit
pub fn make_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
            debug!("Could not mark {} executable: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Real ffmpeg/ffprobe binding
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    paths: ToolPaths,
    trace_timeout: Duration,
    retry_timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(paths: ToolPaths, config: &FixerConfig) -> Self {
        Self {
            paths,
            trace_timeout: config.trace_timeout(),
            retry_timeout: config.trace_retry_timeout(),
        }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    /// Version line reported by `ffmpeg -version`
    pub async fn version(&self) -> Result<String> {
        let out = run_tool(&self.paths.ffmpeg, &os_args(&[OsStr::new("-version")]), self.trace_timeout).await?;
        Ok(out.stdout.lines().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_trace(&self, input: &Path) -> Result<Option<String>> {
        let Some(ffprobe) = &self.paths.ffprobe else {
            return Ok(None);
        };

        let args = os_args(&[OsStr::new("-v"), OsStr::new("trace"), OsStr::new("-i"), input.as_os_str()]);
        match run_tool(ffprobe, &args, self.trace_timeout).await {
            Ok(out) => Ok(Some(out.combined())),
            Err(FixerError::ToolTimeout { secs, .. }) => {
                warn!(
                    "ffprobe trace timed out after {}s for {}, retrying with simplified arguments",
                    secs,
                    input.display()
                );
                let args = os_args(&[
                    OsStr::new("-show_format"),
                    OsStr::new("-show_streams"),
                    OsStr::new("-i"),
                    input.as_os_str(),
                ]);
                let out = run_tool(ffprobe, &args, self.retry_timeout).await?;
                Ok(Some(out.combined()))
            }
            Err(e) => Err(e),
        }
    }

    async fn encoder_tag(&self, input: &Path) -> Result<Option<String>> {
        let Some(ffprobe) = &self.paths.ffprobe else {
            return Ok(None);
        };

        let args = os_args(&[
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format_tags=encoder"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            input.as_os_str(),
        ]);
        let out = run_tool(ffprobe, &args, self.trace_timeout).await?;
        Ok(Some(out.stdout.trim().to_string()))
    }

    async fn transcoder_trace(&self, input: &Path) -> Result<String> {
        // ffmpeg exits non-zero here (no output given); only the dump matters.
        let args = os_args(&[
            OsStr::new("-hide_banner"),
            OsStr::new("-v"),
            OsStr::new("trace"),
            OsStr::new("-i"),
            input.as_os_str(),
        ]);
        let out = run_tool(&self.paths.ffmpeg, &args, self.trace_timeout).await?;
        Ok(out.stderr)
    }

    async fn remux(&self, input: &Path, output: &Path, timeout: Duration) -> Result<ToolOutput> {
        let args = os_args(&[
            OsStr::new("-hide_banner"),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-map"),
            OsStr::new("0"),
            OsStr::new("-c"),
            OsStr::new("copy"),
            OsStr::new("-movflags"),
            OsStr::new("+faststart"),
            OsStr::new("-y"),
            output.as_os_str(),
        ]);
        run_tool(&self.paths.ffmpeg, &args, timeout).await
    }
}
