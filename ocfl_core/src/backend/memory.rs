//! In-memory object store client.

use super::object_store::{ListPage, ObjectStat, ObjectStoreClient};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// An [`ObjectStoreClient`] holding one bucket in memory.
///
/// Listing honours a configurable page size so callers exercise
/// continuation tokens. Writes can be made to fail on demand.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    fail_writes: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryObjectStore {
    /// Create an empty bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            fail_writes: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Set the maximum number of keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every subsequent write fail with status 503 (or stop failing).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `list_objects` requests served.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Every key in the bucket, sorted.
    pub fn keys(&self) -> Vec<String> {
        match self.objects.lock() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    fn objects(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| Error::backend(Some(500), "object store lock poisoned"))
    }
}

impl ObjectStoreClient for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::backend(Some(503), format!("put '{}' refused", key)));
        }
        self.objects()?.insert(key.to_string(), bytes.to_vec());
        debug!(key, bytes = bytes.len(), "memory put");
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects()?.get(key).cloned())
    }

    fn list_objects(&self, prefix: &str, continuation_token: Option<&str>) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects()?;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.is_none_or(|t| k.as_str() > t))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let continuation_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage {
            keys,
            continuation_token,
        })
    }

    fn remove_objects(&self, keys: &[String]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::backend(Some(503), "delete refused"));
        }
        let mut objects = self.objects()?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn path_exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects()?;
        if key.is_empty() {
            return Ok(!objects.is_empty());
        }
        if objects.contains_key(key) {
            return Ok(true);
        }
        let tree = format!("{}/", key);
        Ok(objects.keys().any(|k| k.starts_with(&tree)))
    }

    fn stat(&self, key: &str) -> Result<Option<ObjectStat>> {
        Ok(self.objects()?.get(key).map(|bytes| ObjectStat {
            key: key.to_string(),
            size: bytes.len() as u64,
        }))
    }

    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        if self.stat(key)?.is_none() {
            return Err(Error::backend(Some(404), format!("no such key '{}'", key)));
        }
        Ok(format!(
            "memory://{}/{}?expires={}",
            self.bucket,
            key,
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_stat() {
        let store = MemoryObjectStore::new("b");
        store.put_object("k", b"value").unwrap();
        assert_eq!(store.get_object("k").unwrap().unwrap(), b"value");
        assert_eq!(store.stat("k").unwrap().unwrap().size, 5);
        assert!(store.get_object("missing").unwrap().is_none());
        assert!(store.stat("missing").unwrap().is_none());
    }

    #[test]
    fn test_pagination() {
        let store = MemoryObjectStore::new("b").with_page_size(2);
        for key in ["p/a", "p/b", "p/c", "q/d"] {
            store.put_object(key, b"x").unwrap();
        }

        let first = store.list_objects("p/", None).unwrap();
        assert_eq!(first.keys, vec!["p/a", "p/b"]);
        let token = first.continuation_token.unwrap();

        let second = store.list_objects("p/", Some(&token)).unwrap();
        assert_eq!(second.keys, vec!["p/c"]);
        assert!(second.continuation_token.is_none());
    }

    #[test]
    fn test_path_exists_for_objects_and_prefixes() {
        let store = MemoryObjectStore::new("b");
        store.put_object("a/b/c.txt", b"x").unwrap();
        assert!(store.path_exists("a/b/c.txt").unwrap());
        assert!(store.path_exists("a/b").unwrap());
        assert!(store.path_exists("a").unwrap());
        assert!(!store.path_exists("a/b/c").unwrap());
        assert!(!store.path_exists("a/bb").unwrap());
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryObjectStore::new("b");
        store.fail_writes(true);
        let err = store.put_object("k", b"x").unwrap_err();
        assert!(matches!(err, Error::Backend { status: Some(503), .. }));

        store.fail_writes(false);
        store.put_object("k", b"x").unwrap();
    }

    #[test]
    fn test_download_missing_is_404() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = MemoryObjectStore::new("b");
        let err = store
            .download("nope", &temp_dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, Error::Backend { status: Some(404), .. }));
    }
}
