//! Filesystem backend.

use super::{Backend, BackendKind};
use crate::error::{Error, Result};
use crate::walk;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backend storing objects as plain directories under a root.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create a backend rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a key.
    pub fn path(&self, key: &str) -> PathBuf {
        walk::key_to_path(&self.root, key)
    }
}

/// Rename `src` to `dest`, falling back to copy-then-delete across devices.
fn move_tree(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if src.is_dir() => {
            debug!(src = %src.display(), error = %e, "rename failed, copying instead");
            walk::copy_tree(src, dest)?;
            fs::remove_dir_all(src)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Backend for FsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path(key).exists())
    }

    fn is_tree(&self, key: &str) -> Result<bool> {
        Ok(self.path(key).is_dir())
    }

    fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_object_path(key, "has no parent directory"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(bytes)?;
        temp_file.flush()?;
        temp_file.persist(&path)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = self.path(prefix);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        walk::relative_files(&path)
    }

    fn stage(&self, key: &str, deposit: &Path) -> Result<()> {
        fs::create_dir_all(deposit)?;
        let source = self.path(key);
        if source.is_dir() {
            let copied = walk::copy_tree(&source, deposit)?;
            debug!(deposit = %deposit.display(), files = copied, "staged existing object");
        }
        Ok(())
    }

    fn publish(&self, deposit: &Path, key: &str, backup: &Path) -> Result<()> {
        let target = self.path(key);
        let had_previous = target.exists();

        if had_previous {
            remove_path(backup)?;
            move_tree(&target, backup).map_err(|e| {
                Error::publish(format!("could not back up {}: {}", target.display(), e))
            })?;
        }

        match move_tree(deposit, &target) {
            Ok(()) => {
                if had_previous && let Err(e) = remove_path(backup) {
                    warn!(backup = %backup.display(), error = %e, "failed to remove backup");
                }
                info!(target = %target.display(), "published deposit");
                Ok(())
            }
            Err(e) => {
                if had_previous {
                    let restored = remove_path(&target)
                        .map_err(Error::from)
                        .and_then(|()| move_tree(backup, &target));
                    match restored {
                        Ok(()) => info!(target = %target.display(), "restored backup"),
                        Err(restore_err) => warn!(
                            backup = %backup.display(),
                            error = %restore_err,
                            "failed to restore backup"
                        ),
                    }
                }
                Err(Error::publish(e.to_string()))
            }
        }
    }

    fn remove_tree(&self, key: &str) -> Result<()> {
        remove_path(&self.path(key))?;
        Ok(())
    }

    fn download(&self, key: &str, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path(key), target)?;
        Ok(())
    }

    fn presigned_url(&self, _key: &str, _ttl: Duration) -> Result<String> {
        Err(Error::unsupported("presigned URLs", "filesystem"))
    }

    fn locate(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = walk::key_to_path(root, rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_write_bytes_replaces_atomically() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path());

        backend.write_bytes("a/file.txt", b"one").unwrap();
        backend.write_bytes("a/file.txt", b"two").unwrap();
        assert_eq!(backend.read_bytes("a/file.txt").unwrap().unwrap(), b"two");
        // no temp files left behind
        assert_eq!(backend.list("a").unwrap(), vec!["file.txt"]);
    }

    #[test]
    fn test_stage_copies_existing_object() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path().join("repo"));
        backend.write_bytes("obj/v1/content/a.txt", b"a").unwrap();

        let deposit = temp_dir.path().join("deposit");
        backend.stage("obj", &deposit).unwrap();
        assert_eq!(fs::read(deposit.join("v1/content/a.txt")).unwrap(), b"a");

        let fresh = temp_dir.path().join("fresh");
        backend.stage("new-obj", &fresh).unwrap();
        assert!(fresh.is_dir());
    }

    #[test]
    fn test_publish_into_empty_slot() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path().join("repo"));
        let deposit = temp_dir.path().join("deposit");
        write(&deposit, "v1/content/a.txt", b"a");

        backend
            .publish(&deposit, "x/y/obj", &temp_dir.path().join("backup"))
            .unwrap();

        assert!(!deposit.exists());
        assert_eq!(
            backend.read_bytes("x/y/obj/v1/content/a.txt").unwrap().unwrap(),
            b"a"
        );
    }

    #[test]
    fn test_publish_swaps_out_previous_object() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path().join("repo"));
        backend.write_bytes("obj/stale.txt", b"stale").unwrap();

        let deposit = temp_dir.path().join("deposit");
        let backup = temp_dir.path().join("backup");
        write(&deposit, "fresh.txt", b"fresh");

        backend.publish(&deposit, "obj", &backup).unwrap();

        assert_eq!(backend.list("obj").unwrap(), vec!["fresh.txt"]);
        assert!(!backup.exists());
        assert!(!deposit.exists());
    }

    #[test]
    fn test_failed_publish_restores_backup() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path().join("repo"));
        backend.write_bytes("obj/keep.txt", b"keep").unwrap();

        let missing_deposit = temp_dir.path().join("no-deposit");
        let backup = temp_dir.path().join("backup");
        let err = backend.publish(&missing_deposit, "obj", &backup).unwrap_err();

        assert!(matches!(err, Error::Publish { .. }));
        assert!(err.to_string().starts_with("Error moving deposit object to repository"));
        assert_eq!(backend.read_bytes("obj/keep.txt").unwrap().unwrap(), b"keep");
    }

    #[test]
    fn test_presigned_url_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(temp_dir.path());
        let err = backend
            .presigned_url("a", Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }
}
