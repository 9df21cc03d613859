use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::external_sort::constants::*;
use crate::external_sort::error::{Result, SortError};

pub fn extension_for_phase(phase: usize) -> String {
    format!("{}{}", TEMP_FILE_EXTENSION_PREFIX, phase)
}

/// Fresh, unique path for a file produced by `phase`.
pub fn new_phase_file(temp_dir: &Path, phase: usize) -> PathBuf {
    temp_dir.join(format!("{}.{}", Uuid::new_v4().simple(), extension_for_phase(phase)))
}

/// Where a phase file is written before it is complete.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_FILE_EXTENSION);
    PathBuf::from(name)
}

/// Lists the finished files of `phase` in `temp_dir`, sorted by name.
pub fn files_for_phase(temp_dir: &Path, phase: usize) -> Result<Vec<PathBuf>> {
    let extension = extension_for_phase(phase);
    let mut files = Vec::new();

    for entry in WalkDir::new(temp_dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.map_err(walkdir_error)?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(extension.as_str()) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Removes every temp file (finished or partial) from `temp_dir`.
pub fn remove_all(temp_dir: &Path) -> Result<usize> {
    if !temp_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(temp_dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.map_err(walkdir_error)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_temp = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.contains(TEMP_FILE_NAME_MARKER));
        if is_temp {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    if removed > 0 {
        debug!("Removed {} leftover temp files from {}", removed, temp_dir.display());
    }
    Ok(removed)
}

/// A phase file being written under its partial name.
///
/// [`commit`](Self::commit) renames it into place; dropping it uncommitted
/// deletes the partial file, so only complete files ever carry a phase
/// extension.
pub struct PendingFile {
    final_path: PathBuf,
    partial_path: PathBuf,
    committed: bool,
}

impl PendingFile {
    pub fn create(final_path: PathBuf) -> Result<(Self, std::fs::File)> {
        let partial_path = partial_path(&final_path);
        let file = std::fs::File::create(&partial_path)?;
        Ok((
            Self {
                final_path,
                partial_path,
                committed: false,
            },
            file,
        ))
    }

    /// Call only after the file handle was flushed and dropped.
    pub fn commit(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.partial_path, &self.final_path)?;
        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.partial_path);
        }
    }
}

pub fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn walkdir_error(e: walkdir::Error) -> SortError {
    match e.into_io_error() {
        Some(io) => io.into(),
        None => SortError::InvalidState(
            "filesystem loop while listing temp directory".to_string(),
        ),
    }
}
