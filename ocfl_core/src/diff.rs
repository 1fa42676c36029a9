//! Differences between two versions of an object.
//!
//! Files are compared by their resolved storage path together with their
//! digest. Unchanged files resolve to the same `vN/content/...` path in both
//! versions, while a changed file resolves to different paths, so the three
//! result sets never overlap.

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::inventory::Inventory;
use crate::version::VersionId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Storage paths partitioned by how they changed between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionDiff {
    /// Present with identical content in both versions.
    pub same: Vec<String>,
    /// Present only in the earlier version.
    pub previous: Vec<String>,
    /// Present only in the later version.
    pub next: Vec<String>,
}

impl VersionDiff {
    /// Whether the two versions hold the same files.
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty() && self.next.is_empty()
    }
}

/// Compare two versions of one inventory given as `vN` strings.
pub fn diff_versions(inventory: &Inventory, previous: &str, next: &str) -> Result<VersionDiff> {
    let previous = VersionId::parse(previous)?;
    let next = VersionId::parse(next)?;
    if previous >= next {
        return Err(Error::invalid_arguments(format!(
            "'previous' ({}) must be an earlier version than 'next' ({})",
            previous, next
        )));
    }
    Ok(diff_files(
        resolved(inventory, previous)?,
        resolved(inventory, next)?,
    ))
}

/// Compare the head versions of two inventories; `None` is an empty object.
pub fn diff_heads(previous: Option<&Inventory>, next: &Inventory) -> Result<VersionDiff> {
    let before = match previous {
        Some(inventory) => resolved(inventory, inventory.head)?,
        None => BTreeMap::new(),
    };
    Ok(diff_files(before, resolved(next, next.head)?))
}

fn resolved(inventory: &Inventory, version: VersionId) -> Result<BTreeMap<String, Digest>> {
    Ok(inventory
        .version(version)?
        .entries()
        .into_iter()
        .map(|entry| (entry.path.clone(), entry.hash.clone()))
        .collect())
}

fn diff_files(before: BTreeMap<String, Digest>, after: BTreeMap<String, Digest>) -> VersionDiff {
    let mut same = BTreeSet::new();
    let mut previous = BTreeSet::new();
    let mut next = BTreeSet::new();

    for (path, hash) in &before {
        if after.get(path) == Some(hash) {
            same.insert(path.clone());
        } else {
            previous.insert(path.clone());
        }
    }
    for (path, hash) in &after {
        if before.get(path) != Some(hash) {
            next.insert(path.clone());
        }
    }

    VersionDiff {
        same: same.into_iter().collect(),
        previous: previous.into_iter().collect(),
        next: next.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DigestAlgorithm;
    use crate::inventory::{DigestMap, INVENTORY_TYPE, VersionRecord};
    use chrono::Utc;

    /// Inventory whose manifest keeps the first path seen for each digest.
    fn inventory(versions: &[Vec<(String, u8)>]) -> Inventory {
        let mut manifest = DigestMap::new();
        let mut records = BTreeMap::new();
        for (i, files) in versions.iter().enumerate() {
            let id = VersionId::new(i as u32 + 1).unwrap();
            let mut state = DigestMap::new();
            for (path, content) in files {
                let hash = DigestAlgorithm::Sha512.hash_bytes(&[*content]);
                manifest
                    .entry(hash.clone())
                    .or_insert_with(|| vec![format!("{}/content/{}", id, path)]);
                state.entry(hash).or_default().push(path.clone());
            }
            records.insert(
                id,
                VersionRecord {
                    created: Utc::now(),
                    message: None,
                    user: None,
                    state,
                },
            );
        }
        Inventory {
            id: "obj".into(),
            inventory_type: INVENTORY_TYPE.into(),
            digest_algorithm: DigestAlgorithm::Sha512,
            head: VersionId::new(versions.len().max(1) as u32).unwrap(),
            manifest,
            versions: records,
        }
    }

    fn files(entries: &[(&str, u8)]) -> Vec<(String, u8)> {
        entries.iter().map(|(p, c)| (p.to_string(), *c)).collect()
    }

    #[test]
    fn test_partitions_paths() {
        let inv = inventory(&[
            files(&[("same.txt", 1), ("changed.txt", 2), ("gone.txt", 3)]),
            files(&[("same.txt", 1), ("changed.txt", 4), ("added.txt", 5)]),
        ]);

        let diff = diff_versions(&inv, "v1", "v2").unwrap();
        assert_eq!(diff.same, vec!["v1/content/same.txt"]);
        assert_eq!(
            diff.previous,
            vec!["v1/content/changed.txt", "v1/content/gone.txt"]
        );
        assert_eq!(
            diff.next,
            vec!["v2/content/added.txt", "v2/content/changed.txt"]
        );
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_rejects_bad_versions() {
        let inv = inventory(&[files(&[("a", 1)]), files(&[("a", 2)])]);
        assert!(matches!(
            diff_versions(&inv, "1", "v2"),
            Err(Error::InvalidVersion { .. })
        ));
        assert!(matches!(
            diff_versions(&inv, "v2", "v1"),
            Err(Error::InvalidArguments { .. })
        ));
        assert!(matches!(
            diff_versions(&inv, "v2", "v2"),
            Err(Error::InvalidArguments { .. })
        ));
        assert!(matches!(
            diff_versions(&inv, "v1", "v9"),
            Err(Error::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_diff_heads_against_nothing() {
        let inv = inventory(&[files(&[("a", 1), ("b", 2)])]);
        let diff = diff_heads(None, &inv).unwrap();
        assert!(diff.same.is_empty() && diff.previous.is_empty());
        assert_eq!(diff.next, vec!["v1/content/a", "v1/content/b"]);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// `same` agrees in both directions and the three sets never overlap
        #[test]
        fn prop_diff_symmetry(
            a in proptest::collection::btree_map("[a-d]{1,2}", 0u8..3, 0..8),
            b in proptest::collection::btree_map("[a-d]{1,2}", 0u8..3, 0..8),
        ) {
            let inv = inventory(&[a.into_iter().collect(), b.into_iter().collect()]);
            let v1 = resolved(&inv, VersionId::FIRST)?;
            let v2 = resolved(&inv, VersionId::new(2).unwrap())?;

            let forward = diff_files(v1.clone(), v2.clone());
            let reverse = diff_files(v2, v1);
            prop_assert_eq!(&forward.same, &reverse.same);
            prop_assert_eq!(&forward.previous, &reverse.next);

            let previous: BTreeSet<_> = forward.previous.iter().collect();
            let next: BTreeSet<_> = forward.next.iter().collect();
            let same: BTreeSet<_> = forward.same.iter().collect();
            prop_assert!(previous.is_disjoint(&next));
            prop_assert!(same.is_disjoint(&previous));
            prop_assert!(same.is_disjoint(&next));
        }
    }
}
