use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};
use crate::error::Result;

/// One input file queued for processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    /// Size in bytes when the directory was scanned
    pub size: u64,
}

impl FileTask {
    /// Name used in log lines and progress text
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// True if `path` has extension `ext`, ignoring case
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(ext.trim_start_matches('.')))
        .unwrap_or(false)
}

/// Regular files directly inside `dir` with the target extension, sorted by name.
/// Subdirectories (the output directory included) are not descended into.
pub fn find_target_files(dir: &Path, ext: &str) -> Result<Vec<FileTask>> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input directory does not exist: {}", dir.display()),
        )
        .into());
    }

    info!("Scanning directory: {}", dir.display());

    let mut tasks = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker.into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, ext) {
            continue;
        }

        let size = entry.metadata().map_err(std::io::Error::from)?.len();
        debug!("Found target file: {} ({} bytes)", path.display(), size);
        tasks.push(FileTask {
            path: path.to_path_buf(),
            size,
        });
    }

    info!("Scan complete: found {} .{} files", tasks.len(), ext);
    Ok(tasks)
}
