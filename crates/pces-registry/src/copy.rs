use crate::reader::list_pces_files;
use pces_core::{AncientMode, PcesError, PcesFile, Result};
use std::io;
use std::path::{Path, PathBuf};

const MAX_COPY_ATTEMPTS: usize = 10;

/// Copies the files of a live stream that may hold indicators `>= lower_bound`.
///
/// Files are hard linked when possible and copied otherwise, keeping their
/// `yyyy/mm/dd` location relative to `root`. The writer may prune a file
/// between listing and copying it; such an attempt is rolled back and the
/// whole copy retried a bounded number of times. Returns the number of
/// files created below `destination`.
pub fn copy_pces_files(
    root: &Path,
    ancient_mode: AncientMode,
    lower_bound: i64,
    destination: &Path,
) -> Result<usize> {
    let mut last_error = None;

    for attempt in 1..=MAX_COPY_ATTEMPTS {
        let mut copied = Vec::new();
        match copy_once(root, ancient_mode, lower_bound, destination, &mut copied) {
            Ok(()) => {
                tracing::info!(
                    files = copied.len(),
                    destination = %destination.display(),
                    "copied event stream files"
                );
                return Ok(copied.len());
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "failed to copy event stream files, retrying");
                for path in &copied {
                    if let Err(e) = std::fs::remove_file(path) {
                        tracing::warn!(path = %path.display(), error = %e, "failed to roll back copied file");
                    }
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        PcesError::IllegalState(String::from("copy gave up without an attempt"))
    }))
}

fn copy_once(
    root: &Path,
    ancient_mode: AncientMode,
    lower_bound: i64,
    destination: &Path,
    copied: &mut Vec<PathBuf>,
) -> Result<()> {
    let files = list_pces_files(root, ancient_mode)?;

    for file in files.iter().filter(|f| f.upper_bound() >= lower_bound) {
        let target = target_path(root, destination, file)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if link_or_copy(file.path(), &target)? {
            copied.push(target);
        }
    }

    Ok(())
}

fn target_path(root: &Path, destination: &Path, file: &PcesFile) -> Result<PathBuf> {
    let relative = file.path().strip_prefix(root).map_err(|_| {
        PcesError::IllegalState(format!(
            "{} is not below {}",
            file.path().display(),
            root.display()
        ))
    })?;
    Ok(destination.join(relative))
}

/// Returns whether a new file was created at `target`.
fn link_or_copy(source: &Path, target: &Path) -> io::Result<bool> {
    match std::fs::hard_link(source, target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(_) => std::fs::copy(source, target).map(|_| true),
    }
}
