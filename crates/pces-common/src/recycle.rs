use std::io;
use std::path::{Path, PathBuf};

/// Soft-delete service.
///
/// Files handed to a recycle bin disappear from their original location but
/// remain recoverable for forensic purposes.
pub trait RecycleBin: Send + Sync {
    fn recycle(&self, path: &Path) -> io::Result<()>;
}

/// Moves recycled files into a single holding directory.
///
/// Name collisions are resolved by appending `.<n>` to the file name.
#[derive(Debug, Clone)]
pub struct DirectoryRecycleBin {
    directory: PathBuf,
}

impl DirectoryRecycleBin {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn destination(&self, path: &Path) -> io::Result<PathBuf> {
        let Some(file_name) = path.file_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot recycle {}", path.display()),
            ));
        };

        let mut destination = self.directory.join(file_name);
        let mut collision = 0u32;
        while destination.exists() {
            collision += 1;
            let mut name = file_name.to_os_string();
            name.push(format!(".{collision}"));
            destination = self.directory.join(name);
        }

        Ok(destination)
    }
}

impl RecycleBin for DirectoryRecycleBin {
    fn recycle(&self, path: &Path) -> io::Result<()> {
        if !path.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.directory)?;
        let destination = self.destination(path)?;

        if std::fs::rename(path, &destination).is_err() {
            // Different filesystem, fall back to copy + delete.
            std::fs::copy(path, &destination)?;
            std::fs::remove_file(path)?;
        }

        tracing::debug!(
            from = %path.display(),
            to = %destination.display(),
            "recycled file"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_recycle_moves_file_and_resolves_collisions() {
        let temp_dir = TempDir::new().unwrap();
        let bin = DirectoryRecycleBin::new(temp_dir.path().join("bin"));

        let first = temp_dir.path().join("a").join("event.pces");
        let second = temp_dir.path().join("b").join("event.pces");
        for path in [&first, &second] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"data").unwrap();
        }

        bin.recycle(&first).unwrap();
        bin.recycle(&second).unwrap();

        assert!(!first.exists());
        assert!(!second.exists());
        assert!(bin.directory().join("event.pces").exists());
        assert!(bin.directory().join("event.pces.1").exists());
    }

    #[test]
    fn test_recycle_missing_file_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let bin = DirectoryRecycleBin::new(temp_dir.path().join("bin"));
        bin.recycle(&temp_dir.path().join("missing.pces")).unwrap();
        assert!(!bin.directory().exists());
    }
}
