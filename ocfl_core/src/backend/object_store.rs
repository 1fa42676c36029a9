//! S3-compatible object store backend.
//!
//! The SDK binding itself lives behind [`ObjectStoreClient`]; [`S3Backend`]
//! maps the engine's storage operations onto it. Object stores have no
//! rename primitive, so publishing a deposit is a recursive upload sync and
//! readers may observe a partially updated object until it completes.

use super::{Backend, BackendKind};
use crate::error::{Error, Result};
use crate::layout::join_key;
use crate::walk;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum number of keys removed in one request.
const REMOVE_BATCH: usize = 1000;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass back to `list_objects` to fetch the next page; `None` on the last page.
    pub continuation_token: Option<String>,
}

/// Object metadata returned by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
}

/// Client for a single bucket of an S3-compatible store.
///
/// Failures are reported as [`Error::Backend`] carrying the HTTP-style
/// status of the failed request where one is available.
pub trait ObjectStoreClient: Send + Sync + fmt::Debug {
    /// Bucket name.
    fn bucket(&self) -> &str;

    /// Store bytes under `key`.
    fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the bytes under `key`, or `None` if absent.
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List keys starting with `prefix`, one page at a time.
    fn list_objects(&self, prefix: &str, continuation_token: Option<&str>) -> Result<ListPage>;

    /// Delete the given keys. Missing keys are ignored.
    fn remove_objects(&self, keys: &[String]) -> Result<()>;

    /// Whether `key` is an object or a prefix of at least one object.
    fn path_exists(&self, key: &str) -> Result<bool>;

    /// Metadata for `key`, or `None` if absent.
    fn stat(&self, key: &str) -> Result<Option<ObjectStat>>;

    /// A time-limited GET URL for `key`.
    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Upload a local file to `key`.
    fn upload(&self, local: &Path, key: &str) -> Result<()> {
        let bytes = fs::read(local)?;
        self.put_object(key, &bytes)
    }

    /// Download `key` to a local file, creating parent directories.
    fn download(&self, key: &str, local: &Path) -> Result<()> {
        let bytes = self
            .get_object(key)?
            .ok_or_else(|| Error::backend(Some(404), format!("no such key '{}'", key)))?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local, bytes)?;
        Ok(())
    }

    /// Upload every file under `local` beneath `prefix`, keeping relative paths.
    ///
    /// Returns the number of files uploaded.
    fn sync_local_path_to_bucket(&self, local: &Path, prefix: &str) -> Result<usize> {
        let mut uploaded = 0;
        for path in walk::files(local) {
            let path = path?;
            let key = join_key(prefix, &walk::relative_key(local, &path)?);
            self.upload(&path, &key)?;
            uploaded += 1;
        }
        Ok(uploaded)
    }
}

/// Backend storing objects under a key prefix of one bucket.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Arc<dyn ObjectStoreClient>,
    prefix: String,
}

impl S3Backend {
    /// Create a backend over `client`, rooting the repository at `prefix`
    /// (empty for the bucket root).
    pub fn new(client: Arc<dyn ObjectStoreClient>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { client, prefix }
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<dyn ObjectStoreClient> {
        &self.client
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.prefix, key.trim_matches('/'))
    }

    fn tree_prefix(full_key: &str) -> String {
        if full_key.is_empty() {
            String::new()
        } else {
            format!("{}/", full_key)
        }
    }

    /// Every key under `prefix`, following continuation tokens.
    fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = self.client.list_objects(prefix, token.as_deref())?;
            pages += 1;
            keys.extend(page.keys);
            match page.continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(prefix, pages, keys = keys.len(), "listed objects");
        Ok(keys)
    }
}

impl Backend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.client.path_exists(&self.full_key(key))
    }

    fn is_tree(&self, key: &str) -> Result<bool> {
        let prefix = Self::tree_prefix(&self.full_key(key));
        let page = self.client.list_objects(&prefix, None)?;
        Ok(!page.keys.is_empty())
    }

    fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.client.get_object(&self.full_key(key))
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.client.put_object(&self.full_key(key), bytes)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let tree = Self::tree_prefix(&self.full_key(prefix));
        let mut keys: Vec<String> = self
            .list_all(&tree)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(tree.as_str()).map(str::to_string))
            .filter(|k| !k.is_empty())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn stage(&self, _key: &str, deposit: &Path) -> Result<()> {
        // only the new version is uploaded on publish
        fs::create_dir_all(deposit)?;
        Ok(())
    }

    fn publish(&self, deposit: &Path, key: &str, _backup: &Path) -> Result<()> {
        let target = self.full_key(key);
        let uploaded = self
            .client
            .sync_local_path_to_bucket(deposit, &target)
            .map_err(|e| Error::publish(e.to_string()))?;
        fs::remove_dir_all(deposit)?;
        info!(target = %self.locate(key), files = uploaded, "synced deposit");
        Ok(())
    }

    fn remove_tree(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        let mut keys = self.list_all(&Self::tree_prefix(&full))?;
        if !full.is_empty() && self.client.stat(&full)?.is_some() {
            keys.push(full);
        }
        for batch in keys.chunks(REMOVE_BATCH) {
            self.client.remove_objects(batch)?;
        }
        Ok(())
    }

    fn download(&self, key: &str, target: &Path) -> Result<()> {
        self.client.download(&self.full_key(key), target)
    }

    fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.client.presigned_url(&self.full_key(key), ttl)
    }

    fn locate(&self, key: &str) -> String {
        format!("s3://{}/{}", self.client.bucket(), self.full_key(key))
    }
}
