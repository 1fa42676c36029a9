//! Version identifiers and the reconstructed per-version file view.

use crate::error::{Error, Result};
use crate::hash::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A version identifier, `vN` with N >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId(u32);

impl VersionId {
    /// The first version of every object.
    pub const FIRST: VersionId = VersionId(1);

    /// Create a version id from its number.
    pub fn new(number: u32) -> Result<Self> {
        if number == 0 {
            return Err(Error::invalid_version("v0", "versions start at v1"));
        }
        Ok(VersionId(number))
    }

    /// The numeric part.
    pub fn number(&self) -> u32 {
        self.0
    }

    /// The version that follows this one.
    pub fn next(&self) -> Result<VersionId> {
        self.0
            .checked_add(1)
            .map(VersionId)
            .ok_or_else(|| Error::invalid_version(self.to_string(), "no version follows it"))
    }

    /// Parse a `vN` string.
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix('v')
            .ok_or_else(|| Error::invalid_version(s, "must match the form 'vN'"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_version(s, "must match the form 'vN'"));
        }
        // vN renders without padding, so a padded id would not survive a round trip
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(Error::invalid_version(s, "zero-padded versions are not supported"));
        }
        let number = digits
            .parse::<u32>()
            .map_err(|e| Error::invalid_version(s, e.to_string()))?;
        Self::new(number).map_err(|_| Error::invalid_version(s, "versions start at v1"))
    }

    /// Extract the version from a storage path such as `v3/content/a.txt`.
    pub fn from_content_path(path: &str) -> Option<Self> {
        path.split('/').next().and_then(|first| Self::parse(first).ok())
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// The agent responsible for a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One file of a version, resolved against the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    /// Bare filename.
    pub name: String,
    /// Path within the version, e.g. `sample/file_0.txt`.
    pub logical_path: String,
    /// Storage path relative to the object root, e.g. `v1/content/sample/file_0.txt`.
    pub path: String,
    /// Content digest.
    pub hash: Digest,
    /// Version whose content directory holds the bytes.
    pub version: VersionId,
}

/// A version record with its state reconstructed from the inventory.
///
/// `state` groups entries by bare filename; files with the same name in
/// different directories share a bucket and are told apart by `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub id: VersionId,
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub state: BTreeMap<String, Vec<StateEntry>>,
}

impl Version {
    /// Every entry of the version, ordered by logical path.
    pub fn entries(&self) -> Vec<&StateEntry> {
        let mut entries: Vec<&StateEntry> = self.state.values().flatten().collect();
        entries.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));
        entries
    }

    /// Number of files in the version.
    pub fn file_count(&self) -> usize {
        self.state.values().map(Vec::len).sum()
    }
}
