//! The swap-marker protocol: a single file in the old cache root whose
//! presence on next start triggers directory substitution.

use std::io;
use std::path::{Path, PathBuf};

/// File name of the swap marker, placed directly in the old cache root.
pub const MARKER_FILE_NAME: &str = "storages-replacement-marker";

/// Name the backed-up old cache root is renamed to during a swap.
pub const BACKUP_DIR_NAME: &str = "caches-backup";

/// Errors validating or applying a swap marker.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// The underlying file I/O failed.
    #[error("swap I/O error: {0}")]
    Io(#[from] io::Error),
    /// The marker's target resolves outside the old root's parent
    /// directory.
    #[error("swap target {0:?} escapes the old cache root's parent")]
    TargetEscapesParent(PathBuf),
    /// The marker's target is not a directory.
    #[error("swap target {0:?} is not a directory")]
    TargetNotADirectory(PathBuf),
    /// The marker's target itself contains a marker file, which would
    /// cause a recursive swap.
    #[error("swap target {0:?} itself contains a marker file")]
    TargetContainsMarker(PathBuf),
}

/// Write the swap marker into `old_root`, pointing at `new_cache_dir`
/// (given as a path relative to `old_root`).
pub fn write_marker(old_root: &Path, new_cache_relative: &Path) -> io::Result<()> {
    let marker_path = old_root.join(MARKER_FILE_NAME);
    let mut contents = new_cache_relative.to_string_lossy().into_owned();
    contents.push('\n');
    std::fs::write(marker_path, contents)
}

/// Read the marker under `old_root`, if present, returning the relative
/// path it names (not yet validated).
pub fn read_marker(old_root: &Path) -> io::Result<Option<PathBuf>> {
    let marker_path = old_root.join(MARKER_FILE_NAME);
    match std::fs::read_to_string(&marker_path) {
        Ok(contents) => Ok(Some(PathBuf::from(contents.trim_end_matches('\n')))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Run the full swap protocol against `old_root`, if a marker is
/// present. A no-op (`Ok(false)`) if no marker exists. On success the
/// marker has been deleted, the old root renamed to
/// `caches-backup`, and the new cache directory renamed into the old
/// root's place.
pub fn apply_pending_swap(old_root: &Path) -> Result<bool, SwapError> {
    let Some(relative_target) = read_marker(old_root)? else {
        return Ok(false);
    };
    std::fs::remove_file(old_root.join(MARKER_FILE_NAME))?;

    let parent = old_root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let target = old_root.join(&relative_target);
    let canonical_target = target
        .canonicalize()
        .map_err(|_| SwapError::TargetEscapesParent(target.clone()))?;
    let canonical_parent = parent
        .canonicalize()
        .unwrap_or(parent.clone());
    if !canonical_target.starts_with(&canonical_parent) {
        return Err(SwapError::TargetEscapesParent(target));
    }
    if !canonical_target.is_dir() {
        return Err(SwapError::TargetNotADirectory(target));
    }
    if canonical_target.join(MARKER_FILE_NAME).exists() {
        return Err(SwapError::TargetContainsMarker(target));
    }

    let backup = parent.join(BACKUP_DIR_NAME);
    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }
    std::fs::rename(old_root, &backup)?;
    std::fs::rename(&canonical_target, old_root)?;
    tracing::info!(?old_root, ?backup, "applied pending cache swap");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(apply_pending_swap(dir.path()).unwrap(), false);
    }

    #[test]
    fn marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), Path::new("new-cache")).unwrap();
        let read = read_marker(dir.path()).unwrap();
        assert_eq!(read, Some(PathBuf::from("new-cache")));
    }

    #[test]
    fn swap_renames_old_to_backup_and_new_into_place() {
        let workspace = tempfile::tempdir().unwrap();
        let old_root = workspace.path().join("cache");
        std::fs::create_dir_all(&old_root).unwrap();
        std::fs::write(old_root.join("sentinel-old"), b"old").unwrap();

        let new_cache = old_root.join("new-cache");
        std::fs::create_dir_all(&new_cache).unwrap();
        std::fs::write(new_cache.join("sentinel-new"), b"new").unwrap();

        write_marker(&old_root, Path::new("new-cache")).unwrap();
        let swapped = apply_pending_swap(&old_root).unwrap();
        assert!(swapped);

        assert!(old_root.join("sentinel-new").exists());
        assert!(!old_root.join(MARKER_FILE_NAME).exists());
        let backup = workspace.path().join(BACKUP_DIR_NAME);
        assert!(backup.join("sentinel-old").exists());
    }

    #[test]
    fn target_containing_marker_is_rejected() {
        let workspace = tempfile::tempdir().unwrap();
        let old_root = workspace.path().join("cache");
        std::fs::create_dir_all(&old_root).unwrap();
        let new_cache = old_root.join("new-cache");
        std::fs::create_dir_all(&new_cache).unwrap();
        std::fs::write(new_cache.join(MARKER_FILE_NAME), b"x").unwrap();

        write_marker(&old_root, Path::new("new-cache")).unwrap();
        let err = apply_pending_swap(&old_root).unwrap_err();
        assert!(matches!(err, SwapError::TargetContainsMarker(_)));
    }
}
