//! Version reconciliation.
//!
//! Takes the freshly built single-version inventory and the last committed
//! inventory and produces the next full inventory:
//!
//! 1. For each digest, the current-version paths and the last manifest's
//!    paths are clustered by logical path.
//! 2. A cluster with a current-version entry and a prior entry is a
//!    duplicate: the bytes already live under the earlier version, so the
//!    deposited copy is deleted and the earlier path is kept.
//! 3. A cluster with only a current-version entry is new content.
//! 4. Clusters with no current-version entry are not carried into the new
//!    version. Their manifest paths survive because older versions still
//!    reference them.
//!
//! If the resulting manifest and version state match the last inventory's
//! manifest and head state, nothing changed and the deposit is discarded.

use crate::error::Result;
use crate::hash::Digest;
use crate::inventory::{DigestMap, Inventory, split_content_path};
use crate::version::VersionId;
use crate::walk;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Outcome of reconciling a new version against the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The new version differs; holds the complete next inventory.
    Changed(Box<Inventory>),
    /// The new version is identical to the head; no version should be created.
    NoChange,
}

/// Stable view hashed to decide whether anything changed.
#[derive(Serialize)]
struct Comparison<'a> {
    manifest: &'a DigestMap,
    state: &'a DigestMap,
}

/// Reconcile `current` (one version, paths in `deposit_root`) against `last`.
///
/// Duplicate files are removed from `deposit_root` and empty directories
/// under the new version's content directory are pruned. When `last` is
/// `None` the current inventory is returned unchanged.
pub fn reconcile(
    last: Option<&Inventory>,
    current: Inventory,
    deposit_root: &Path,
) -> Result<Reconciled> {
    let Some(last) = last else {
        return Ok(Reconciled::Changed(Box::new(current)));
    };

    let new_version = current.head;
    let mut manifest = last.manifest.clone();
    let mut deduplicated = 0usize;

    for (hash, current_paths) in &current.manifest {
        let clusters = cluster(hash, current_paths, last.manifest.get(hash));
        for entries in clusters.values() {
            let Some(current_path) = entries.iter().find(|(v, _)| *v == new_version) else {
                // present before, absent now
                continue;
            };
            let earliest_prior = entries
                .iter()
                .filter(|(v, _)| *v != new_version)
                .min_by_key(|(v, _)| *v);

            match earliest_prior {
                Some(_) => {
                    // already in the manifest via `last`
                    remove_deposited(deposit_root, &current_path.1)?;
                    deduplicated += 1;
                }
                None => {
                    let paths = manifest.entry(hash.clone()).or_default();
                    if !paths.contains(&current_path.1) {
                        paths.push(current_path.1.clone());
                    }
                }
            }
        }
    }

    let content_root = deposit_root
        .join(new_version.to_string())
        .join(crate::inventory::CONTENT_DIR);
    walk::prune_empty_dirs(&content_root)?;

    let new_state = &current.head_record()?.state;
    let before = stable_digest(last, &last.manifest, &last.head_record()?.state)?;
    let after = stable_digest(last, &manifest, new_state)?;
    if before == after {
        debug!(id = %current.id, version = %new_version, "no change against head");
        return Ok(Reconciled::NoChange);
    }

    let mut versions = last.versions.clone();
    versions.extend(current.versions);
    debug!(
        id = %current.id,
        version = %new_version,
        deduplicated,
        "reconciled version"
    );

    Ok(Reconciled::Changed(Box::new(Inventory {
        id: current.id,
        inventory_type: current.inventory_type,
        digest_algorithm: current.digest_algorithm,
        head: new_version,
        manifest,
        versions,
    })))
}

/// Group current and prior paths for one digest by logical path.
///
/// Paths that do not follow the `vN/content/...` layout are skipped.
fn cluster(
    hash: &Digest,
    current: &[String],
    prior: Option<&Vec<String>>,
) -> BTreeMap<String, Vec<(VersionId, String)>> {
    let mut clusters: BTreeMap<String, Vec<(VersionId, String)>> = BTreeMap::new();
    for path in current.iter().chain(prior.into_iter().flatten()) {
        match split_content_path(path) {
            Some((version, logical)) => clusters
                .entry(logical.to_string())
                .or_default()
                .push((version, path.clone())),
            None => debug!(hash = %hash.short(), path = %path, "skipping non-content manifest path"),
        }
    }
    for entries in clusters.values_mut() {
        entries.sort();
        entries.dedup();
    }
    clusters
}

fn remove_deposited(deposit_root: &Path, manifest_path: &str) -> Result<()> {
    let path = walk::key_to_path(deposit_root, manifest_path);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        // merge-mode entries carried forward were never written
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn stable_digest(inventory: &Inventory, manifest: &DigestMap, state: &DigestMap) -> Result<Digest> {
    let bytes = serde_json::to_vec(&Comparison { manifest, state })?;
    Ok(inventory.digest_algorithm.hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DigestAlgorithm;
    use crate::inventory::{BuildRequest, UpdateMode, build_inventory};
    use chrono::Utc;
    use tempfile::TempDir;

    fn sha(data: &[u8]) -> Digest {
        DigestAlgorithm::Sha512.hash_bytes(data)
    }

    struct Fixture {
        _dir: TempDir,
        root: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("deposit");
            fs::create_dir_all(&root).unwrap();
            Self { _dir: dir, root }
        }

        fn write(&self, version: u32, rel: &str, content: &[u8]) {
            let path = walk::key_to_path(&self.root, &format!("v{}/content/{}", version, rel));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn build(&self, version: u32, prior: Option<&Inventory>, mode: UpdateMode) -> Inventory {
            let content = self.root.join(format!("v{}/content", version));
            build_inventory(BuildRequest {
                id: "obj",
                digest_algorithm: DigestAlgorithm::Sha512,
                version: VersionId::new(version).unwrap(),
                content_dir: &content,
                prior,
                mode,
                remove_files: &[],
                created: Utc::now(),
                message: None,
                user: None,
            })
            .unwrap()
        }

        fn commit(&self, version: u32, prior: Option<&Inventory>) -> Option<Inventory> {
            let current = self.build(version, prior, UpdateMode::Update);
            match reconcile(prior, current, &self.root).unwrap() {
                Reconciled::Changed(inv) => Some(*inv),
                Reconciled::NoChange => None,
            }
        }
    }

    #[test]
    fn test_first_version_passes_through() {
        let fx = Fixture::new();
        fx.write(1, "a.txt", b"a");
        let v1 = fx.commit(1, None).unwrap();
        assert_eq!(v1.head.to_string(), "v1");
        assert_eq!(v1.manifest[&sha(b"a")], vec!["v1/content/a.txt".to_string()]);
    }

    #[test]
    fn test_unchanged_content_is_no_change() {
        let fx = Fixture::new();
        fx.write(1, "a.txt", b"a");
        fx.write(1, "dir/b.txt", b"b");
        let v1 = fx.commit(1, None).unwrap();

        fx.write(2, "a.txt", b"a");
        fx.write(2, "dir/b.txt", b"b");
        assert!(fx.commit(2, Some(&v1)).is_none());
    }

    #[test]
    fn test_duplicate_removed_from_deposit() {
        let fx = Fixture::new();
        fx.write(1, "same.txt", b"same");
        let v1 = fx.commit(1, None).unwrap();

        fx.write(2, "same.txt", b"same");
        fx.write(2, "sub/new.txt", b"new");
        let v2 = fx.commit(2, Some(&v1)).unwrap();

        assert_eq!(v2.head.to_string(), "v2");
        assert_eq!(
            v2.manifest[&sha(b"same")],
            vec!["v1/content/same.txt".to_string()]
        );
        assert_eq!(
            v2.manifest[&sha(b"new")],
            vec!["v2/content/sub/new.txt".to_string()]
        );
        assert!(!fx.root.join("v2/content/same.txt").exists());
        assert!(fx.root.join("v2/content/sub/new.txt").exists());

        // both versions still resolve the unchanged file to v1
        let state = v2.version(v2.head).unwrap();
        assert_eq!(state.state["same.txt"][0].path, "v1/content/same.txt");
    }

    #[test]
    fn test_changed_file_gets_new_path() {
        let fx = Fixture::new();
        fx.write(1, "file1.txt", b"one");
        let v1 = fx.commit(1, None).unwrap();

        fx.write(2, "file1.txt", b"uno");
        let v2 = fx.commit(2, Some(&v1)).unwrap();

        assert_eq!(v2.manifest.len(), 2);
        assert_eq!(
            v2.manifest[&sha(b"uno")],
            vec!["v2/content/file1.txt".to_string()]
        );
        // history is preserved
        assert_eq!(
            v2.manifest[&sha(b"one")],
            vec!["v1/content/file1.txt".to_string()]
        );
        assert_eq!(v2.versions.len(), 2);
        v2.validate().unwrap();
    }

    #[test]
    fn test_deletion_is_a_change_and_history_survives() {
        let fx = Fixture::new();
        fx.write(1, "keep.txt", b"keep");
        fx.write(1, "drop.txt", b"drop");
        let v1 = fx.commit(1, None).unwrap();

        fx.write(2, "keep.txt", b"keep");
        let v2 = fx.commit(2, Some(&v1)).unwrap();

        let head_state = &v2.versions[&v2.head].state;
        assert!(!head_state.contains_key(&sha(b"drop")));
        // v1 still references it, so the manifest keeps it
        assert!(v2.manifest.contains_key(&sha(b"drop")));
        v2.validate().unwrap();
        // everything in v2 was a duplicate, so its content dir is gone
        assert!(!fx.root.join("v2/content").exists());
    }

    #[test]
    fn test_content_restored_to_earlier_bytes_dedupes_to_earliest() {
        let fx = Fixture::new();
        fx.write(1, "f.txt", b"A");
        let v1 = fx.commit(1, None).unwrap();
        fx.write(2, "f.txt", b"B");
        let v2 = fx.commit(2, Some(&v1)).unwrap();
        fx.write(3, "f.txt", b"A");
        let v3 = fx.commit(3, Some(&v2)).unwrap();

        assert_eq!(v3.manifest[&sha(b"A")], vec!["v1/content/f.txt".to_string()]);
        assert!(!fx.root.join("v3/content/f.txt").exists());
        let state = v3.version(v3.head).unwrap();
        assert_eq!(state.state["f.txt"][0].version.number(), 1);
    }

    #[test]
    fn test_rename_keeps_content_at_new_path() {
        let fx = Fixture::new();
        fx.write(1, "old.txt", b"bytes");
        let v1 = fx.commit(1, None).unwrap();
        fx.write(2, "new.txt", b"bytes");
        let v2 = fx.commit(2, Some(&v1)).unwrap();

        let paths = &v2.manifest[&sha(b"bytes")];
        assert!(paths.contains(&"v1/content/old.txt".to_string()));
        assert!(paths.contains(&"v2/content/new.txt".to_string()));
        assert!(fx.root.join("v2/content/new.txt").exists());
    }

    #[test]
    fn test_merge_mode_carried_entries_dedupe_without_files() {
        let fx = Fixture::new();
        fx.write(1, "a.txt", b"a");
        let v1 = fx.commit(1, None).unwrap();

        fx.write(2, "b.txt", b"b");
        let current = fx.build(2, Some(&v1), UpdateMode::Merge);
        let v2 = match reconcile(Some(&v1), current, &fx.root).unwrap() {
            Reconciled::Changed(inv) => *inv,
            Reconciled::NoChange => panic!("expected a change"),
        };
        assert_eq!(v2.manifest[&sha(b"a")], vec!["v1/content/a.txt".to_string()]);
        let head_state = &v2.versions[&v2.head].state;
        assert!(head_state.contains_key(&sha(b"a")));
        assert!(head_state.contains_key(&sha(b"b")));
    }

    #[test]
    fn test_older_versions_are_folded_forward() {
        let fx = Fixture::new();
        fx.write(1, "f.txt", b"1");
        let v1 = fx.commit(1, None).unwrap();
        fx.write(2, "f.txt", b"2");
        let v2 = fx.commit(2, Some(&v1)).unwrap();
        fx.write(3, "f.txt", b"3");
        let v3 = fx.commit(3, Some(&v2)).unwrap();

        assert_eq!(v3.versions.len(), 3);
        assert_eq!(v3.versions[&VersionId::new(1).unwrap()], v1.versions[&v1.head]);
        assert_eq!(v3.versions[&VersionId::new(2).unwrap()], v2.versions[&v2.head]);
    }
}
