//! Object engine configuration.

use crate::backend::BackendKind;
use crate::hash::DigestAlgorithm;
use crate::inventory::UpdateMode;
use crate::layout::IdMapping;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default scratch directory, relative to the working directory.
pub const DEFAULT_SCRATCH_DIR: &str = ".ocfl-scratch";

const DEPOSIT_DIR: &str = "deposit";
const BACKUP_DIR: &str = "backup";

/// Settings shared by every object opened through a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ObjectOptions {
    /// Local root for deposits and commit backups.
    pub scratch_root: PathBuf,
    /// Digest algorithm for new objects.
    pub digest_algorithm: DigestAlgorithm,
    /// How object ids map to repository paths.
    pub id_mapping: IdMapping,
    /// Update mode when the caller does not choose one. `None` selects the
    /// backend default.
    pub default_update_mode: Option<UpdateMode>,
}

impl Default for ObjectOptions {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_DIR),
            digest_algorithm: DigestAlgorithm::default(),
            id_mapping: IdMapping::default(),
            default_update_mode: None,
        }
    }
}

impl ObjectOptions {
    /// Options with the given scratch root and defaults elsewhere.
    pub fn with_scratch(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            ..Self::default()
        }
    }

    /// The update mode used when an update does not specify one.
    ///
    /// Filesystem deposits hold a full copy of the object, so a complete
    /// state is the natural input. Object-store deposits hold only the new
    /// version and default to merging.
    pub fn update_mode_for(&self, kind: BackendKind) -> UpdateMode {
        self.default_update_mode.unwrap_or(match kind {
            BackendKind::Filesystem => UpdateMode::Update,
            BackendKind::ObjectStore => UpdateMode::Merge,
        })
    }

    /// Local deposit directory for an object stored at `object_path`.
    pub fn deposit_path(&self, object_path: &str) -> PathBuf {
        crate::walk::key_to_path(&self.scratch_root.join(DEPOSIT_DIR), object_path)
    }

    /// Local backup slot used while swapping an object during commit.
    pub fn backup_path(&self, object_path: &str) -> PathBuf {
        crate::walk::key_to_path(&self.scratch_root.join(BACKUP_DIR), object_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let options = ObjectOptions::default();
        assert_eq!(options.digest_algorithm, DigestAlgorithm::Sha512);
        assert_eq!(options.id_mapping, IdMapping::HashedNTuple);
        assert_eq!(
            options.update_mode_for(BackendKind::Filesystem),
            UpdateMode::Update
        );
        assert_eq!(
            options.update_mode_for(BackendKind::ObjectStore),
            UpdateMode::Merge
        );
    }

    #[test]
    fn test_explicit_update_mode_wins() {
        let options = ObjectOptions {
            default_update_mode: Some(UpdateMode::Merge),
            ..ObjectOptions::default()
        };
        assert_eq!(
            options.update_mode_for(BackendKind::Filesystem),
            UpdateMode::Merge
        );
    }

    #[test]
    fn test_staging_paths() {
        let options = ObjectOptions::with_scratch("/scratch");
        assert_eq!(
            options.deposit_path("ab/cd"),
            Path::new("/scratch/deposit/ab/cd")
        );
        assert_eq!(
            options.backup_path("ab/cd"),
            Path::new("/scratch/backup/ab/cd")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let options: ObjectOptions =
            serde_json::from_str(r#"{"digest_algorithm":"sha256","id_mapping":"direct"}"#)
                .unwrap();
        assert_eq!(options.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(options.id_mapping, IdMapping::Direct);
        assert_eq!(options.scratch_root, PathBuf::from(DEFAULT_SCRATCH_DIR));
    }
}
