//! Storage backends.
//!
//! The object engine is written against [`Backend`]; each storage system
//! supplies a concrete adapter. Keys are `/`-separated and relative to the
//! repository root. Deposits are always staged in a local scratch directory
//! and handed to [`Backend::publish`] once finalized.

mod fs;
mod memory;
mod object_store;

pub use fs::FsBackend;
pub use memory::MemoryObjectStore;
pub use object_store::{ListPage, ObjectStat, ObjectStoreClient, S3Backend};

use crate::error::Result;
use crate::layout::join_key;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Which family of storage a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Local (or mounted) filesystem.
    Filesystem,
    /// S3-compatible object store.
    ObjectStore,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Filesystem => write!(f, "filesystem"),
            BackendKind::ObjectStore => write!(f, "object store"),
        }
    }
}

/// Storage operations the object engine needs.
pub trait Backend: Send + Sync + fmt::Debug {
    /// The storage family.
    fn kind(&self) -> BackendKind;

    /// Whether a file or tree exists at `key`.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Whether `key` names a tree (directory or key prefix) rather than a file.
    fn is_tree(&self, key: &str) -> Result<bool>;

    /// Read a file. Returns `None` if it does not exist.
    fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a file, replacing any existing one.
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Every file beneath `prefix`, as sorted keys relative to `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Seed a fresh local deposit for the object stored at `key`.
    fn stage(&self, key: &str, deposit: &Path) -> Result<()>;

    /// Move a finalized deposit into the repository at `key`.
    ///
    /// `backup` is a scratch location the backend may use to hold the
    /// previous object while it is swapped out. The deposit no longer exists
    /// once this returns successfully.
    fn publish(&self, deposit: &Path, key: &str, backup: &Path) -> Result<()>;

    /// Delete everything at or beneath `key`. Missing keys are not an error.
    fn remove_tree(&self, key: &str) -> Result<()>;

    /// Copy the file at `key` to a local path, creating parent directories.
    fn download(&self, key: &str, target: &Path) -> Result<()>;

    /// A time-limited URL granting read access to `key`.
    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Human-readable location of `key`, used in messages.
    fn locate(&self, key: &str) -> String;
}

impl dyn Backend + '_ {
    /// Read and decode a JSON file. Returns `None` if it does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode a value as pretty JSON and write it.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes)
    }
}

/// An object root: a backend plus the key the object lives at.
#[derive(Debug, Clone, Copy)]
pub struct ObjectRoot<'a> {
    pub backend: &'a dyn Backend,
    pub key: &'a str,
}

impl<'a> ObjectRoot<'a> {
    pub fn new(backend: &'a dyn Backend, key: &'a str) -> Self {
        Self { backend, key }
    }

    /// Full backend key for a path relative to the object root.
    pub fn key_for(&self, rel: &str) -> String {
        join_key(self.key, rel)
    }

    pub fn exists(&self, rel: &str) -> Result<bool> {
        self.backend.exists(&self.key_for(rel))
    }

    pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        self.backend.read_bytes(&self.key_for(rel))
    }

    pub fn write(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        self.backend.write_bytes(&self.key_for(rel), bytes)
    }

    /// Every file of the object, relative to its root.
    pub fn files(&self) -> Result<Vec<String>> {
        self.backend.list(self.key)
    }

    pub fn download(&self, rel: &str, target: &Path) -> Result<()> {
        self.backend.download(&self.key_for(rel), target)
    }

    pub fn locate(&self) -> String {
        self.backend.locate(self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn backends(temp_dir: &TempDir) -> Vec<Box<dyn Backend>> {
        vec![
            Box::new(FsBackend::new(temp_dir.path().join("repo"))),
            Box::new(S3Backend::new(Arc::new(MemoryObjectStore::new("bucket")), "")),
        ]
    }

    #[test]
    fn test_json_helpers_on_every_backend() {
        let temp_dir = TempDir::new().unwrap();
        for backend in backends(&temp_dir) {
            let value = Sample {
                name: "x".into(),
                count: 3,
            };
            backend.write_json("a/b.json", &value).unwrap();
            let back: Option<Sample> = backend.read_json("a/b.json").unwrap();
            assert_eq!(back, Some(value), "{:?}", backend.kind());

            let missing: Option<Sample> = backend.read_json("a/none.json").unwrap();
            assert!(missing.is_none());
        }
    }

    #[test]
    fn test_list_and_remove_on_every_backend() {
        let temp_dir = TempDir::new().unwrap();
        for backend in backends(&temp_dir) {
            backend.write_bytes("obj/x.txt", b"x").unwrap();
            backend.write_bytes("obj/sub/y.txt", b"y").unwrap();
            backend.write_bytes("other/z.txt", b"z").unwrap();

            assert_eq!(backend.list("obj").unwrap(), vec!["sub/y.txt", "x.txt"]);
            assert!(backend.is_tree("obj").unwrap());
            assert!(!backend.is_tree("obj/x.txt").unwrap());
            assert!(backend.exists("obj/sub").unwrap());

            backend.remove_tree("obj").unwrap();
            assert!(!backend.exists("obj").unwrap());
            assert!(backend.exists("other/z.txt").unwrap());
            backend.remove_tree("never-there").unwrap();
        }
    }

    #[test]
    fn test_download_on_every_backend() {
        let temp_dir = TempDir::new().unwrap();
        for (i, backend) in backends(&temp_dir).into_iter().enumerate() {
            backend.write_bytes("obj/v1/content/a.txt", b"abc").unwrap();
            let target = temp_dir.path().join(format!("out{}/nested/a.txt", i));
            backend.download("obj/v1/content/a.txt", &target).unwrap();
            assert_eq!(std::fs::read(&target).unwrap(), b"abc");

            assert!(backend.download("obj/missing", &target).is_err());
        }
    }
}
