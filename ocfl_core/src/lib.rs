//! # OCFL Core
//!
//! A versioned, content-addressed object store following the Oxford Common
//! File Layout.
//!
//! Each object is a directory tree holding an immutable sequence of
//! versions. A version records its files by content digest, and bytes that
//! did not change since an earlier version are stored only once.
//!
//! ## Features
//!
//! - Two-stage updates: content is staged in a local deposit, reconciled
//!   against the previous version, then published
//! - No-op detection: an update with unchanged content creates no version
//! - Cross-version deduplication of unchanged files
//! - Filesystem and S3-compatible object store backends
//! - Verification, version diffs and export
//!
//! ## Example
//!
//! ```no_run
//! use ocfl_core::{FsBackend, ObjectOptions, Repository, UpdateOptions};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(FsBackend::new("./my-repo"));
//! let repo = Repository::create(backend, ObjectOptions::with_scratch("./scratch"))?;
//!
//! // Deposit a directory as the first version
//! let mut object = repo.object("ark:/12345/bcd987")?;
//! object.update(UpdateOptions::from_source(Path::new("./my-data")))?;
//!
//! // Check the stored files against the inventory
//! let report = object.verify()?;
//! assert!(report.is_valid);
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod diff;
mod error;
mod export;
mod hash;
mod inventory;
mod layout;
mod object;
mod reconcile;
mod repository;
mod verify;
mod version;
mod walk;

pub use backend::{
    Backend, BackendKind, FsBackend, ListPage, MemoryObjectStore, ObjectRoot, ObjectStat,
    ObjectStoreClient, S3Backend,
};
pub use config::ObjectOptions;
pub use diff::{VersionDiff, diff_heads};
pub use error::{Error, Result};
pub use export::ExportVersion;
pub use hash::{Digest, DigestAlgorithm};
pub use inventory::{
    BuildRequest, DigestMap, INVENTORY_TYPE, Inventory, UpdateMode, VersionRecord,
    build_inventory,
};
pub use layout::{IdMapping, RepositoryLayout};
pub use object::{
    ContentWriter, Location, ObjectTarget, OcflObject, UpdateOptions, UpdateOutcome,
};
pub use reconcile::{Reconciled, reconcile};
pub use repository::{ObjectSummary, Repository};
pub use verify::VerificationReport;
pub use version::{StateEntry, User, Version, VersionId};
pub use walk::{FileDigest, digest_tree};

