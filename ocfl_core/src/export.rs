//! Exporting object versions to a local directory.

use crate::backend::ObjectRoot;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::version::VersionId;
use crate::walk;
use std::fs;
use std::path::Path;
use tracing::info;

/// Which part of an object to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportVersion {
    /// The head version's files at their logical paths.
    #[default]
    Head,
    /// One version's files at their logical paths.
    Version(VersionId),
    /// Every stored file in its physical layout, including inventories.
    All,
}

impl ExportVersion {
    /// Parse `vN`, `head` or `all`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "head" => Ok(ExportVersion::Head),
            "all" => Ok(ExportVersion::All),
            other => Ok(ExportVersion::Version(VersionId::parse(other)?)),
        }
    }
}

/// Export part of the object rooted at `root` into `target`.
///
/// `target` must be an existing, empty directory. Returns the number of
/// files written.
pub fn export(
    inventory: &Inventory,
    root: ObjectRoot<'_>,
    target: &Path,
    version: ExportVersion,
) -> Result<usize> {
    check_target(target)?;

    let mut written = 0;
    match version {
        ExportVersion::All => {
            for key in root.files()? {
                root.download(&key, &walk::key_to_path(target, &key))?;
                written += 1;
            }
        }
        ExportVersion::Head | ExportVersion::Version(_) => {
            let id = match version {
                ExportVersion::Version(v) => v,
                _ => inventory.head,
            };
            for entry in inventory.version(id)?.entries() {
                root.download(&entry.path, &walk::key_to_path(target, &entry.logical_path))?;
                written += 1;
            }
        }
    }

    info!(
        id = %inventory.id,
        target = %target.display(),
        files = written,
        "exported object"
    );
    Ok(written)
}

fn check_target(target: &Path) -> Result<()> {
    if !target.is_dir() {
        return Err(Error::export_target(target, "does not exist or is not a directory"));
    }
    if fs::read_dir(target)?.next().is_some() {
        return Err(Error::export_target(target, "is not empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_version() {
        assert_eq!(ExportVersion::parse("head").unwrap(), ExportVersion::Head);
        assert_eq!(ExportVersion::parse("all").unwrap(), ExportVersion::All);
        assert_eq!(
            ExportVersion::parse("v3").unwrap(),
            ExportVersion::Version(VersionId::new(3).unwrap())
        );
        assert!(ExportVersion::parse("latest").is_err());
    }

    #[test]
    fn test_target_checks() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let err = check_target(&missing).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        fs::write(temp_dir.path().join("file"), b"x").unwrap();
        let err = check_target(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("is not empty"));

        let empty = temp_dir.path().join("empty");
        fs::create_dir(&empty).unwrap();
        check_target(&empty).unwrap();
    }
}
