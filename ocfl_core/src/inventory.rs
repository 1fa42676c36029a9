//! Inventory structure and the inventory builder.
//!
//! An inventory is the durable descriptor of an object:
//!
//! ```json
//! {
//!   "id": "...",
//!   "type": "https://ocfl.io/1.0/spec/#inventory",
//!   "digestAlgorithm": "sha512",
//!   "head": "v2",
//!   "manifest": { "<hash>": ["v1/content/a.txt"] },
//!   "versions": { "v1": { "created": "...", "state": { "<hash>": ["a.txt"] } } }
//! }
//! ```
//!
//! Manifest paths are relative to the object root and always carry the
//! `vN/content/` prefix; state paths are logical (version-relative) paths.

use crate::error::{Error, Result};
use crate::hash::{Digest, DigestAlgorithm};
use crate::version::{StateEntry, User, Version, VersionId};
use crate::walk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Inventory type URI for OCFL 1.0 objects.
pub const INVENTORY_TYPE: &str = "https://ocfl.io/1.0/spec/#inventory";

/// Inventory file name at the object root and in each version directory.
pub const INVENTORY_FILE: &str = "inventory.json";

/// Directory holding a version's stored files.
pub const CONTENT_DIR: &str = "content";

/// Mapping from content digest to paths.
pub type DigestMap = BTreeMap<Digest, Vec<String>>;

/// A single version as persisted in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Digest to logical paths.
    pub state: DigestMap,
}

/// The durable descriptor of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub id: String,
    #[serde(rename = "type")]
    pub inventory_type: String,
    pub digest_algorithm: DigestAlgorithm,
    pub head: VersionId,
    pub manifest: DigestMap,
    pub versions: BTreeMap<VersionId, VersionRecord>,
}

/// How a new version's content relates to the previous version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// The deposited content is the complete state of the new version.
    #[default]
    Update,
    /// The deposited content is a delta applied on top of the head version.
    Merge,
}

/// Split a manifest path `vN/content/<logical>` into its version and logical path.
pub fn split_content_path(path: &str) -> Option<(VersionId, &str)> {
    let (version, rest) = path.split_once('/')?;
    let logical = rest.strip_prefix(CONTENT_DIR)?.strip_prefix('/')?;
    Some((VersionId::parse(version).ok()?, logical))
}

/// Build the manifest path for a logical path stored in `version`.
pub fn content_path(version: VersionId, logical: &str) -> String {
    format!("{}/{}/{}", version, CONTENT_DIR, logical)
}

impl Inventory {
    /// The head version's record.
    pub fn head_record(&self) -> Result<&VersionRecord> {
        self.versions
            .get(&self.head)
            .ok_or_else(|| Error::version_not_found(&self.id, self.head.to_string()))
    }

    /// Ordered version ids.
    pub fn version_ids(&self) -> Vec<VersionId> {
        self.versions.keys().copied().collect()
    }

    /// Every (digest, logical path) pair of a version.
    pub fn state_pairs(&self, version: VersionId) -> Result<Vec<(Digest, String)>> {
        let record = self
            .versions
            .get(&version)
            .ok_or_else(|| Error::version_not_found(&self.id, version.to_string()))?;
        Ok(record
            .state
            .iter()
            .flat_map(|(hash, paths)| paths.iter().map(move |p| (hash.clone(), p.clone())))
            .collect())
    }

    /// Resolve the storage path holding `logical` with digest `hash` as seen by `version`.
    ///
    /// Prefers a manifest path with the same logical path stored at or before
    /// `version`; falls back to the first manifest path for the digest.
    pub fn resolve(&self, hash: &Digest, logical: &str, version: VersionId) -> Option<String> {
        let paths = self.manifest.get(hash)?;
        let same_logical = paths
            .iter()
            .filter_map(|p| split_content_path(p).map(|(v, l)| (v, l, p)))
            .filter(|(v, l, _)| *l == logical && *v <= version)
            .min_by_key(|(v, _, _)| *v)
            .map(|(_, _, p)| p.clone());
        same_logical.or_else(|| paths.first().cloned())
    }

    /// Reconstruct a version's state from the manifest.
    pub fn version(&self, version: VersionId) -> Result<Version> {
        let record = self
            .versions
            .get(&version)
            .ok_or_else(|| Error::version_not_found(&self.id, version.to_string()))?;

        let mut state: BTreeMap<String, Vec<StateEntry>> = BTreeMap::new();
        for (hash, logical_paths) in &record.state {
            for logical in logical_paths {
                let path = self.resolve(hash, logical, version).ok_or_else(|| {
                    Error::not_an_object(
                        &self.id,
                        format!("digest {} of {} is missing from the manifest", hash, logical),
                    )
                })?;
                let stored_in = VersionId::from_content_path(&path).unwrap_or(version);
                let name = logical.rsplit('/').next().unwrap_or(logical).to_string();
                state.entry(name.clone()).or_default().push(StateEntry {
                    name,
                    logical_path: logical.clone(),
                    path,
                    hash: hash.clone(),
                    version: stored_in,
                });
            }
        }
        for entries in state.values_mut() {
            entries.sort_by(|a, b| a.version.cmp(&b.version).then(a.path.cmp(&b.path)));
        }

        Ok(Version {
            id: version,
            created: record.created,
            message: record.message.clone(),
            user: record.user.clone(),
            state,
        })
    }

    /// Check the structural invariants: every state digest is in the manifest
    /// and the head names an existing version.
    pub fn validate(&self) -> Result<()> {
        self.head_record()?;
        for (v, record) in &self.versions {
            for hash in record.state.keys() {
                if !self.manifest.contains_key(hash) {
                    return Err(Error::not_an_object(
                        &self.id,
                        format!("{} references digest {} absent from the manifest", v, hash),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Serialize to the pretty JSON written to disk.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse inventory JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Sidecar file name, e.g. `inventory.json.sha512`.
    pub fn sidecar_name(&self) -> String {
        sidecar_name(self.digest_algorithm)
    }
}

/// Sidecar file name for an algorithm.
pub fn sidecar_name(algorithm: DigestAlgorithm) -> String {
    format!("{}.{}", INVENTORY_FILE, algorithm)
}

/// Sidecar file contents: `<hash>   inventory.json`.
pub fn sidecar_contents(digest: &Digest) -> String {
    format!("{}   {}", digest, INVENTORY_FILE)
}

/// Extract the digest from sidecar contents.
pub fn parse_sidecar(contents: &str) -> Option<Digest> {
    contents
        .split_whitespace()
        .next()
        .and_then(|h| Digest::from_hex(h).ok())
}

/// Inputs to [`build_inventory`].
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub id: &'a str,
    pub digest_algorithm: DigestAlgorithm,
    pub version: VersionId,
    /// The new version's content directory inside the deposit.
    pub content_dir: &'a Path,
    /// Last committed inventory, if the object already exists.
    pub prior: Option<&'a Inventory>,
    pub mode: UpdateMode,
    /// Logical paths to drop from the new version (merge mode).
    pub remove_files: &'a [String],
    pub created: DateTime<Utc>,
    pub message: Option<String>,
    pub user: Option<User>,
}

/// Build the inventory describing only the new version.
///
/// Always digests `content_dir`. In merge mode the prior head state is
/// carried forward under the new version's content path, with freshly
/// written files taking precedence over carried entries at the same logical
/// path; `remove_files` then filters entries by logical path. The returned
/// inventory holds a single version; the reconciler folds history back in.
pub fn build_inventory(request: BuildRequest<'_>) -> Result<Inventory> {
    let fresh = walk::digest_tree(request.content_dir, request.digest_algorithm)?;

    // (hash, logical) pairs, deduplicated
    let mut pairs: BTreeSet<(Digest, String)> = fresh
        .into_iter()
        .map(|f| (f.hash, f.path))
        .collect();

    if request.mode == UpdateMode::Merge
        && let Some(prior) = request.prior
    {
        let written: BTreeSet<String> = pairs.iter().map(|(_, l)| l.clone()).collect();
        for (hash, logical) in prior.state_pairs(prior.head)? {
            if !written.contains(&logical) {
                pairs.insert((hash, logical));
            }
        }
    }

    if !request.remove_files.is_empty() {
        let remove: BTreeSet<&str> = request.remove_files.iter().map(String::as_str).collect();
        pairs.retain(|(_, logical)| !remove.contains(logical.as_str()));
    }

    let mut manifest = DigestMap::new();
    let mut state = DigestMap::new();
    for (hash, logical) in pairs {
        manifest
            .entry(hash.clone())
            .or_default()
            .push(content_path(request.version, &logical));
        state.entry(hash).or_default().push(logical);
    }

    let mut versions = BTreeMap::new();
    versions.insert(
        request.version,
        VersionRecord {
            created: request.created,
            message: request.message,
            user: request.user,
            state,
        },
    );

    Ok(Inventory {
        id: request.id.to_string(),
        inventory_type: INVENTORY_TYPE.to_string(),
        digest_algorithm: request.digest_algorithm,
        head: request.version,
        manifest,
        versions,
    })
}
