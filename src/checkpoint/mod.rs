use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;
use walkdir::WalkDir;

// Anchored so stray files like `best_epoch_010.pth.tar.bak` don't match.
fn epoch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^epoch_(\d+)\.pth\.tar$").expect("fixed pattern"))
}

/// Checkpoint filename for an epoch, e.g. epoch 8 -> `epoch_008.pth.tar`.
pub fn epoch_file_name(epoch: usize) -> String {
    format!("epoch_{epoch:03}.pth.tar")
}

/// Full checkpoint path inside a run directory.
pub fn epoch_file(run_dir: &Path, epoch: usize) -> PathBuf {
    run_dir.join(epoch_file_name(epoch))
}

/// Parse the epoch number out of a checkpoint filename, if it follows the
/// `epoch_<NNN>.pth.tar` convention.
pub fn parse_epoch(file_name: &str) -> Option<usize> {
    let caps = epoch_pattern().captures(file_name)?;
    caps.get(1)?.as_str().parse().ok()
}

/// List all epoch checkpoints in a run directory, sorted by epoch.
pub fn list_epochs(run_dir: &Path) -> Result<Vec<(PathBuf, usize)>> {
    if !run_dir.exists() {
        warn!("Run directory does not exist: {:?}", run_dir);
        return Ok(Vec::new());
    }

    let mut epochs = Vec::new();

    for entry in WalkDir::new(run_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            if let Some(epoch) = parse_epoch(name) {
                epochs.push((path.to_path_buf(), epoch));
            }
        }
    }

    epochs.sort_by_key(|(_, epoch)| *epoch);

    Ok(epochs)
}

/// Highest epoch present in a run directory, or None when the directory is
/// empty or missing.
pub fn latest_epoch(run_dir: &Path) -> Result<Option<usize>> {
    Ok(list_epochs(run_dir)?.last().map(|(_, epoch)| *epoch))
}
