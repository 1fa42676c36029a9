//! Object verification: inventory against physical storage.

use crate::backend::ObjectRoot;
use crate::error::Result;
use crate::inventory::{INVENTORY_FILE, Inventory};
use crate::layout::OBJECT_MARKER;
use crate::version::VersionId;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl VerificationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check that every inventoried file exists and nothing else is stored.
///
/// Missing files are looked up under `active` first and then under
/// `fallback`, which covers a deposit holding only the newest version while
/// earlier versions live in the repository. Extra files are only searched
/// for under `active`.
pub fn verify(
    inventory: &Inventory,
    active: ObjectRoot<'_>,
    fallback: Option<ObjectRoot<'_>>,
) -> Result<VerificationReport> {
    let expected = inventoried_paths(inventory)?;
    let mut errors = Vec::new();

    for path in &expected {
        let found = active.exists(path)?
            || match fallback {
                Some(root) => root.exists(path)?,
                None => false,
            };
        if !found {
            errors.push(format!(
                "'{}' is inventoried but does not exist within the object",
                path
            ));
        }
    }

    for path in active.files()? {
        if is_bookkeeping(&path) {
            continue;
        }
        if !expected.contains(&path) {
            errors.push(format!(
                "The object has a file '{}' that is not in the inventory",
                path
            ));
        }
    }

    if !errors.is_empty() {
        warn!(
            object = %active.locate(),
            errors = errors.len(),
            "verification failed"
        );
    }
    Ok(VerificationReport::from_errors(errors))
}

/// Manifest paths plus every path the versions' states resolve to.
fn inventoried_paths(inventory: &Inventory) -> Result<BTreeSet<String>> {
    let mut paths: BTreeSet<String> = inventory.manifest.values().flatten().cloned().collect();
    for version in inventory.versions.keys() {
        for entry in inventory.version(*version)?.entries() {
            paths.insert(entry.path.clone());
        }
    }
    Ok(paths)
}

/// Marker, inventory and sidecar files at the object root or in a version directory.
fn is_bookkeeping(path: &str) -> bool {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let is_inventory = name == INVENTORY_FILE
        || name
            .strip_prefix(INVENTORY_FILE)
            .is_some_and(|rest| rest.starts_with('.'));
    match dir {
        None => name == OBJECT_MARKER || is_inventory,
        Some(dir) => is_inventory && VersionId::parse(dir).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, FsBackend};
    use crate::hash::DigestAlgorithm;
    use crate::inventory::{BuildRequest, UpdateMode, build_inventory};
    use crate::walk;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = walk::key_to_path(root, rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn object(root: &Path) -> Inventory {
        write(root, "v1/content/a.txt", b"a");
        write(root, "v1/content/dir/b.txt", b"b");
        write(root, OBJECT_MARKER, b"ocfl_object_1.0\n");
        write(root, "inventory.json", b"{}");
        write(root, "inventory.json.sha512", b"x   inventory.json");
        write(root, "v1/inventory.json", b"{}");
        write(root, "v1/inventory.json.sha512", b"x   inventory.json");
        build_inventory(BuildRequest {
            id: "obj",
            digest_algorithm: DigestAlgorithm::Sha512,
            version: VersionId::FIRST,
            content_dir: &root.join("v1/content"),
            prior: None,
            mode: UpdateMode::Update,
            remove_files: &[],
            created: Utc::now(),
            message: None,
            user: None,
        })
        .unwrap()
    }

    #[test]
    fn test_pristine_object_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let inventory = object(temp_dir.path());
        let backend = FsBackend::new(temp_dir.path());

        let report = verify(&inventory, ObjectRoot::new(&backend, ""), None).unwrap();
        assert_eq!(
            report,
            VerificationReport {
                is_valid: true,
                errors: vec![]
            }
        );
    }

    #[test]
    fn test_missing_file_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let inventory = object(temp_dir.path());
        fs::remove_file(temp_dir.path().join("v1/content/dir/b.txt")).unwrap();
        let backend = FsBackend::new(temp_dir.path());

        let report = verify(&inventory, ObjectRoot::new(&backend, ""), None).unwrap();
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            vec!["'v1/content/dir/b.txt' is inventoried but does not exist within the object"]
        );
    }

    #[test]
    fn test_extra_file_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let inventory = object(temp_dir.path());
        write(temp_dir.path(), "v1/content/injected.txt", b"evil");
        let backend = FsBackend::new(temp_dir.path());

        let report = verify(&inventory, ObjectRoot::new(&backend, ""), None).unwrap();
        assert_eq!(
            report.errors,
            vec!["The object has a file 'v1/content/injected.txt' that is not in the inventory"]
        );
    }

    #[test]
    fn test_fallback_root_satisfies_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let repo = temp_dir.path().join("repo");
        let inventory = object(&repo);
        let deposit = temp_dir.path().join("deposit");
        fs::create_dir_all(&deposit).unwrap();

        let repo_backend = FsBackend::new(&repo);
        let deposit_backend = FsBackend::new(&deposit);
        let without = verify(&inventory, ObjectRoot::new(&deposit_backend, ""), None).unwrap();
        assert_eq!(without.errors.len(), 2);

        let with = verify(
            &inventory,
            ObjectRoot::new(&deposit_backend, ""),
            Some(ObjectRoot::new(&repo_backend as &dyn Backend, "")),
        )
        .unwrap();
        assert!(with.is_valid);
    }

    #[test]
    fn test_bookkeeping_files() {
        assert!(is_bookkeeping("0=ocfl_object_1.0"));
        assert!(is_bookkeeping("inventory.json"));
        assert!(is_bookkeeping("inventory.json.sha512"));
        assert!(is_bookkeeping("v3/inventory.json.sha256"));
        assert!(!is_bookkeeping("v3/content/inventory.json"));
        assert!(!is_bookkeeping("inventory.jsonx"));
        assert!(!is_bookkeeping("notes/inventory.json"));
    }
}
