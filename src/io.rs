pub(crate) mod asc;
pub(crate) mod csv;
pub(crate) mod geojson;

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Create the directory if it doesn't exist; error if a non-directory exists there.
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            bail!("Path exists but is not a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

/// Error unless the directory already exists.
pub(crate) fn require_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("Directory does not exist: {}", path.display());
    }
    if !path.is_dir() {
        bail!("Path exists but is not a directory: {}", path.display());
    }
    Ok(())
}

/// Write-then-rename wrapper for atomic output files
pub(crate) struct PendingWrite {
    target: PathBuf,
    tmp: NamedTempFile,
}

pub(crate) fn open_for_write(target: &Path) -> Result<PendingWrite> {
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("create dir {}", parent.display()))?;
    let tmp = NamedTempFile::new_in(parent)
        .context("create temp file")?;

    Ok(PendingWrite { target: target.to_path_buf(), tmp })
}

impl Write for PendingWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.tmp.write(buf) }
    fn flush(&mut self) -> std::io::Result<()> { self.tmp.flush() }
}

pub(crate) fn finalize_write(pending: PendingWrite) -> Result<()> {
    let PendingWrite { target, tmp } = pending;
    tmp.as_file().sync_all().ok(); // best-effort fsync file
    tmp.persist(&target)
        .with_context(|| format!("rename to {}", target.display()))?;
    if let Some(dir) = target.parent() {
        let _ = File::open(dir).and_then(|f| f.sync_all());
    }
    Ok(())
}

/// Write a whole file atomically.
pub(crate) fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let mut pending = open_for_write(target)?;
    pending.write_all(bytes)
        .with_context(|| format!("write {}", target.display()))?;
    finalize_write(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/out.txt");
        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
    }

    #[test]
    fn ensure_dir_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        assert!(ensure_dir_exists(&file).is_err());
        assert!(require_dir_exists(&dir.path().join("missing")).is_err());
        ensure_dir_exists(&dir.path().join("a/b")).unwrap();
        require_dir_exists(&dir.path().join("a/b")).unwrap();
    }
}
