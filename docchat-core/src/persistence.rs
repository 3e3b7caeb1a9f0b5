//! Atomic file writes for the persisted index.
//!
//! Every artifact is first written to a `.tmp` sibling and only renamed into
//! place once all artifacts of a save have been staged, so a crash mid-write
//! never leaves a half-written file at the target path.

use std::io;
use std::path::{Path, PathBuf};

/// A file written to its temporary sibling, waiting to be renamed into place.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Path the data will live at after [`StagedFile::commit`].
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged data over the target path.
    pub fn commit(self) -> io::Result<()> {
        std::fs::rename(&self.tmp, &self.target)
    }

    /// Remove the temporary file without touching the target.
    pub fn discard(self) {
        let _ = std::fs::remove_file(&self.tmp);
    }
}

/// Write `data` to a temporary sibling of `path`.
///
/// Creates parent directories if they don't exist.
pub fn stage(path: &Path, data: &[u8]) -> io::Result<StagedFile> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    Ok(StagedFile {
        tmp,
        target: path.to_path_buf(),
    })
}

/// Stage every `(path, data)` pair, then rename them all into place.
///
/// If any write fails, already staged files are discarded and no target is
/// touched.
pub fn atomic_write_all(files: &[(&Path, &[u8])]) -> io::Result<()> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, data) in files {
        match stage(path, data) {
            Ok(file) => staged.push(file),
            Err(e) => {
                for file in staged {
                    file.discard();
                }
                return Err(e);
            }
        }
    }
    for file in staged {
        file.commit()?;
    }
    Ok(())
}

/// Atomically write raw bytes to a single file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    stage(path, data)?.commit()
}

/// `vectors.bin` -> `vectors.bin.tmp`; keeps siblings with different
/// extensions from colliding.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("data.bin");

        atomic_write(&path, b"payload").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn test_atomic_write_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.json");

        atomic_write(&path, b"{}").unwrap();
        assert!(!dir.path().join("clean.json.tmp").exists());
    }

    #[test]
    fn test_atomic_write_all_commits_every_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("vectors.bin");
        let b = dir.path().join("chunks.json");

        atomic_write_all(&[(&a, b"vec"), (&b, b"meta")]).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), b"vec");
        assert_eq!(std::fs::read(&b).unwrap(), b"meta");
    }

    #[test]
    fn test_staged_file_leaves_target_untouched_until_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");
        std::fs::write(&path, b"old").unwrap();

        let staged = stage(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert_eq!(staged.target(), path.as_path());

        staged.discard();
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert!(!dir.path().join("vectors.bin.tmp").exists());
    }

    #[test]
    fn test_tmp_path_keeps_extension() {
        let p = tmp_path(Path::new("/x/vectors.bin"));
        assert_eq!(p, PathBuf::from("/x/vectors.bin.tmp"));
    }
}
