//! The object lifecycle controller.
//!
//! An [`OcflObject`] is bound to a storage location by [`OcflObject::init`]
//! and then moves between two locations:
//!
//! - `Repository`: reads go to the committed object.
//! - `Deposit`: an update was staged with `commit` disabled; reads go to
//!   the local deposit until it is committed or aborted.
//!
//! Updates always build the new version in a local deposit, reconcile it
//! against the last committed inventory and then publish it through the
//! backend. A deposit directory that already exists on disk means another
//! writer is mid-update and blocks new updates.

use crate::backend::{Backend, BackendKind, FsBackend, ObjectRoot};
use crate::config::ObjectOptions;
use crate::diff::{self, VersionDiff};
use crate::error::{Error, Result};
use crate::export::{self, ExportVersion};
use crate::inventory::{
    self, BuildRequest, CONTENT_DIR, INVENTORY_FILE, Inventory, UpdateMode, build_inventory,
};
use crate::layout::{self, OBJECT_MARKER, OBJECT_MARKER_CONTENT, join_key};
use crate::reconcile::{Reconciled, reconcile};
use crate::verify::{self, VerificationReport};
use crate::version::{User, Version, VersionId};
use crate::walk;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How an object is addressed by [`OcflObject::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectTarget {
    /// An opaque id, mapped to a path by the configured [`layout::IdMapping`].
    Id(String),
    /// An explicit repository-relative path. Filesystem backend only.
    Path(String),
}

/// Where reads of a bound object are served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Repository,
    Deposit,
}

/// Callback that writes a version's files into the given content directory.
pub type ContentWriter<'a> = Box<dyn FnOnce(&Path) -> Result<()> + 'a>;

/// Arguments to [`OcflObject::update`].
///
/// Exactly one of `source`, `writer` or `remove_files` must be supplied.
pub struct UpdateOptions<'a> {
    /// Directory copied recursively into the new version.
    pub source: Option<&'a Path>,
    /// Callback writing the new version's files itself.
    pub writer: Option<ContentWriter<'a>>,
    /// Logical paths to drop from the head version (merge mode only).
    pub remove_files: Vec<String>,
    /// Publish immediately. When false the deposit is left for inspection.
    pub commit: bool,
    /// Overrides the configured update mode.
    pub mode: Option<UpdateMode>,
    pub message: Option<String>,
    pub user: Option<User>,
}

impl Default for UpdateOptions<'_> {
    fn default() -> Self {
        Self {
            source: None,
            writer: None,
            remove_files: Vec::new(),
            commit: true,
            mode: None,
            message: None,
            user: None,
        }
    }
}

impl<'a> UpdateOptions<'a> {
    /// Copy the new version's content from `source`.
    pub fn from_source(source: &'a Path) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Let `writer` fill the new version's content directory.
    pub fn from_writer(writer: impl FnOnce(&Path) -> Result<()> + 'a) -> Self {
        Self {
            writer: Some(Box::new(writer)),
            ..Self::default()
        }
    }

    /// Remove logical paths from the head version.
    pub fn removing<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            remove_files: files.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Stage the deposit without committing it.
    pub fn staged(mut self) -> Self {
        self.commit = false;
        self
    }

    pub fn mode(mut self, mode: UpdateMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}

impl fmt::Debug for UpdateOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("source", &self.source)
            .field("writer", &self.writer.as_ref().map(|_| "<fn>"))
            .field("remove_files", &self.remove_files)
            .field("commit", &self.commit)
            .field("mode", &self.mode)
            .field("message", &self.message)
            .field("user", &self.user)
            .finish()
    }
}

/// Result of [`OcflObject::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new version was created and published.
    Committed(Box<Inventory>),
    /// A new version was staged in the deposit. `head` is the last committed
    /// inventory (absent for a new object) and `next` the staged one.
    Staged {
        head: Option<Box<Inventory>>,
        next: Box<Inventory>,
    },
    /// The content matches the head version; nothing was created.
    Unchanged,
}

#[derive(Debug)]
struct Binding {
    id: String,
    object_path: String,
    deposit: FsBackend,
    backup_path: PathBuf,
    location: Location,
}

/// A versioned object in a repository.
#[derive(Debug)]
pub struct OcflObject {
    backend: Arc<dyn Backend>,
    options: ObjectOptions,
    binding: Option<Binding>,
    /// Last committed inventory.
    inventory: Option<Inventory>,
    /// Inventory of the outstanding deposit.
    pending: Option<Inventory>,
}

/// Inputs to one deposit build.
struct DepositRequest<'a> {
    last: Option<&'a Inventory>,
    source: Option<&'a Path>,
    writer: Option<ContentWriter<'a>>,
    remove_files: &'a [String],
    mode: UpdateMode,
    message: Option<String>,
    user: Option<User>,
}

impl OcflObject {
    /// Create an unbound object over `backend`.
    pub fn new(backend: Arc<dyn Backend>, options: ObjectOptions) -> Self {
        Self {
            backend,
            options,
            binding: None,
            inventory: None,
            pending: None,
        }
    }

    /// Bind the object to its repository, deposit and backup locations.
    pub fn init(&mut self, target: ObjectTarget) -> Result<()> {
        if let Some(binding) = &self.binding {
            return Err(Error::AlreadyBound {
                path: self.backend.locate(&binding.object_path),
            });
        }

        let (id, object_path) = match target {
            ObjectTarget::Id(id) => {
                let path = self.options.id_mapping.map(&id)?;
                (id, path)
            }
            ObjectTarget::Path(path) => {
                if self.backend.kind() != BackendKind::Filesystem {
                    return Err(Error::unsupported(
                        "init by object path",
                        self.backend.kind().to_string(),
                    ));
                }
                let path = layout::normalize_object_path(&path)?;
                (path.clone(), path)
            }
        };

        debug!(id = %id, path = %object_path, "bound object");
        self.binding = Some(Binding {
            deposit: FsBackend::new(self.options.deposit_path(&object_path)),
            backup_path: self.options.backup_path(&object_path),
            id,
            object_path,
            location: Location::Repository,
        });
        Ok(())
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding.as_ref().ok_or(Error::NotBound)
    }

    fn set_location(&mut self, location: Location) {
        if let Some(binding) = self.binding.as_mut() {
            binding.location = location;
        }
    }

    /// The object's id, from its inventory once one is known.
    pub fn id(&self) -> Option<&str> {
        self.pending
            .as_ref()
            .or(self.inventory.as_ref())
            .map(|inv| inv.id.as_str())
            .or_else(|| self.binding.as_ref().map(|b| b.id.as_str()))
    }

    /// Repository-relative path of the object.
    pub fn object_path(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.object_path.as_str())
    }

    /// Local deposit directory.
    pub fn deposit_path(&self) -> Option<&Path> {
        self.binding.as_ref().map(|b| b.deposit.root())
    }

    /// Where reads are currently served from.
    pub fn location(&self) -> Option<Location> {
        self.binding.as_ref().map(|b| b.location)
    }

    fn repository_root(&self) -> Result<ObjectRoot<'_>> {
        let binding = self.binding()?;
        Ok(ObjectRoot::new(self.backend.as_ref(), &binding.object_path))
    }

    fn active_root(&self) -> Result<ObjectRoot<'_>> {
        let binding = self.binding()?;
        Ok(match binding.location {
            Location::Repository => ObjectRoot::new(self.backend.as_ref(), &binding.object_path),
            Location::Deposit => ObjectRoot::new(&binding.deposit, ""),
        })
    }

    /// Repository fallback for reads while an object-store deposit holds
    /// only the newest version.
    fn fallback_root(&self) -> Result<Option<ObjectRoot<'_>>> {
        let binding = self.binding()?;
        if binding.location == Location::Deposit && self.backend.kind() == BackendKind::ObjectStore
        {
            return Ok(Some(self.repository_root()?));
        }
        Ok(None)
    }

    fn active_inventory(&self) -> Result<&Inventory> {
        let binding = self.binding()?;
        let inventory = match binding.location {
            Location::Repository => self.inventory.as_ref(),
            Location::Deposit => self.pending.as_ref(),
        };
        inventory.ok_or_else(|| {
            Error::not_an_object(
                self.backend.locate(&binding.object_path),
                "no inventory loaded",
            )
        })
    }

    /// Read the inventory at the active location into memory.
    pub fn load(&mut self) -> Result<&Inventory> {
        let binding = self.binding()?;
        let location = binding.location;
        let inventory = read_object(self.active_root()?)?;
        debug!(id = %inventory.id, head = %inventory.head, ?location, "loaded object");
        match location {
            Location::Repository => self.inventory = Some(inventory),
            Location::Deposit => self.pending = Some(inventory),
        }
        self.active_inventory()
    }

    /// Whether a committed object exists at the repository location.
    pub fn is_object(&self) -> Result<bool> {
        self.repository_root()?.exists(OBJECT_MARKER)
    }

    /// Whether nothing occupies the object's repository or deposit location.
    pub fn is_available(&self) -> Result<bool> {
        let binding = self.binding()?;
        Ok(!self.backend.exists(&binding.object_path)? && !binding.deposit.root().exists())
    }

    /// Create a new version from a source directory, a writer callback or a
    /// list of files to remove.
    pub fn update(&mut self, options: UpdateOptions<'_>) -> Result<UpdateOutcome> {
        let UpdateOptions {
            source,
            writer,
            remove_files,
            commit,
            mode,
            message,
            user,
        } = options;

        let binding = self.binding()?;
        if binding.location == Location::Deposit {
            return Err(Error::AlreadyInDeposit {
                id: binding.id.clone(),
            });
        }

        let supplied = [
            source.is_some(),
            writer.is_some(),
            !remove_files.is_empty(),
        ]
        .into_iter()
        .filter(|s| *s)
        .count();
        if supplied > 1 {
            return Err(Error::invalid_arguments(
                "Specify only one of 'source', 'writer' or 'remove_files'",
            ));
        }
        if supplied == 0 {
            return Err(Error::invalid_arguments(
                "Specify at least one of 'source', 'writer' or 'remove_files'",
            ));
        }

        let mode = match (mode, remove_files.is_empty()) {
            (Some(UpdateMode::Update), false) => {
                return Err(Error::invalid_arguments(
                    "'remove_files' can only be used in merge mode",
                ));
            }
            (Some(mode), _) => mode,
            (None, false) => UpdateMode::Merge,
            (None, true) => self.options.update_mode_for(self.backend.kind()),
        };

        if let Some(source) = source
            && !source.is_dir()
        {
            return Err(Error::source_missing(source));
        }

        let deposit_path = binding.deposit.root().to_path_buf();
        if deposit_path.exists() {
            return Err(Error::DepositExists {
                id: binding.id.clone(),
                path: deposit_path,
            });
        }
        self.check_not_child()?;

        let last = if self.is_object()? {
            Some(read_object(self.repository_root()?)?)
        } else {
            let binding = self.binding()?;
            if self.backend.exists(&binding.object_path)? {
                return Err(Error::not_an_object(
                    self.backend.locate(&binding.object_path),
                    "path exists but holds no object marker",
                ));
            }
            None
        };
        if last.is_none() && !remove_files.is_empty() {
            return Err(Error::invalid_arguments(
                "'remove_files' needs an existing object to remove files from",
            ));
        }

        let binding = self.binding()?;
        let id = binding.id.clone();
        claim_deposit(&id, &deposit_path)?;
        if let Err(e) = self.backend.stage(&binding.object_path, &deposit_path) {
            if let Err(cleanup) = discard(&deposit_path) {
                warn!(deposit = %deposit_path.display(), error = %cleanup, "failed to discard deposit");
            }
            return Err(e);
        }
        info!(id = %id, deposit = %deposit_path.display(), "created deposit");

        let built = self.build_deposit(DepositRequest {
            last: last.as_ref(),
            source,
            writer,
            remove_files: &remove_files,
            mode,
            message,
            user,
        });
        let next = match built {
            Ok(Some(next)) => next,
            Ok(None) => {
                info!(id = %id, "content unchanged, discarding deposit");
                discard(&deposit_path)?;
                self.inventory = last;
                return Ok(UpdateOutcome::Unchanged);
            }
            Err(e) => {
                if let Err(cleanup) = discard(&deposit_path) {
                    warn!(deposit = %deposit_path.display(), error = %cleanup, "failed to discard deposit");
                }
                return Err(e);
            }
        };

        info!(id = %id, version = %next.head, "staged version");
        self.inventory = last;
        self.pending = Some(next.clone());
        self.set_location(Location::Deposit);

        if commit {
            let committed = self.publish()?;
            return Ok(UpdateOutcome::Committed(Box::new(committed)));
        }
        Ok(UpdateOutcome::Staged {
            head: self.inventory.clone().map(Box::new),
            next: Box::new(next),
        })
    }

    fn check_not_child(&self) -> Result<()> {
        let binding = self.binding()?;
        for ancestor in layout::ancestors(&binding.object_path) {
            if self.backend.exists(&join_key(&ancestor, OBJECT_MARKER))? {
                return Err(Error::child_of_object(
                    self.backend.locate(&binding.object_path),
                    self.backend.locate(&ancestor),
                ));
            }
        }
        Ok(())
    }

    /// Write the new version into the deposit and reconcile it.
    ///
    /// Returns `None` when the version would be identical to the head.
    fn build_deposit(&self, request: DepositRequest<'_>) -> Result<Option<Inventory>> {
        let binding = self.binding()?;
        let deposit_path = binding.deposit.root();
        let last = request.last;

        let version = match last {
            Some(inv) => inv.head.next()?,
            None => VersionId::FIRST,
        };
        let content_dir = deposit_path.join(version.to_string()).join(CONTENT_DIR);
        fs::create_dir_all(&content_dir)?;

        if let Some(source) = request.source {
            let copied = walk::copy_tree(source, &content_dir)?;
            debug!(source = %source.display(), files = copied, "copied source into deposit");
        }
        if let Some(writer) = request.writer {
            writer(&content_dir)?;
        }

        let current = build_inventory(BuildRequest {
            id: last.map_or(binding.id.as_str(), |inv| inv.id.as_str()),
            digest_algorithm: last.map_or(self.options.digest_algorithm, |inv| inv.digest_algorithm),
            version,
            content_dir: &content_dir,
            prior: last,
            mode: request.mode,
            remove_files: request.remove_files,
            created: Utc::now(),
            message: request.message,
            user: request.user,
        })?;

        let next = match reconcile(last, current, deposit_path)? {
            Reconciled::NoChange => return Ok(None),
            Reconciled::Changed(next) => *next,
        };
        walk::prune_empty_dirs(&content_dir)?;

        let root = ObjectRoot::new(&binding.deposit, "");
        root.write(OBJECT_MARKER, OBJECT_MARKER_CONTENT.as_bytes())?;
        write_inventory(root, "", &next)?;
        write_inventory(root, &next.head.to_string(), &next)?;
        Ok(Some(next))
    }

    /// Publish an outstanding deposit after verifying it.
    ///
    /// Any file in the deposit that the inventory does not account for
    /// aborts the commit and leaves the deposit in place.
    pub fn commit(&mut self) -> Result<Inventory> {
        let binding = self.binding()?;
        if binding.location != Location::Deposit {
            return Err(Error::invalid_arguments(
                "There is no deposit to commit; run an update with commit disabled first",
            ));
        }

        let report = self.verify()?;
        if !report.is_valid {
            warn!(id = %binding.id, errors = report.errors.len(), "deposit failed verification");
            return Err(Error::VerificationFailed {
                errors: report.errors,
            });
        }
        self.publish()
    }

    fn publish(&mut self) -> Result<Inventory> {
        let binding = self.binding()?;
        self.backend.publish(
            binding.deposit.root(),
            &binding.object_path,
            &binding.backup_path,
        )?;
        info!(
            id = %binding.id,
            path = %self.backend.locate(&binding.object_path),
            "committed object"
        );

        self.set_location(Location::Repository);
        self.pending = None;
        let inventory = read_object(self.repository_root()?)?;
        self.inventory = Some(inventory.clone());
        Ok(inventory)
    }

    /// Discard the object's deposit without touching the repository.
    ///
    /// Also clears a stale deposit left on disk by another writer. Returns
    /// whether a deposit existed.
    pub fn abort(&mut self) -> Result<bool> {
        let binding = self.binding()?;
        let deposit_path = binding.deposit.root().to_path_buf();
        let existed = deposit_path.exists();
        if existed {
            discard(&deposit_path)?;
            info!(id = %binding.id, deposit = %deposit_path.display(), "aborted deposit");
        }
        self.set_location(Location::Repository);
        self.pending = None;
        Ok(existed)
    }

    /// Delete the object from the repository along with any deposit.
    pub fn remove(&mut self) -> Result<()> {
        let binding = self.binding()?;
        self.backend.remove_tree(&binding.object_path)?;
        discard(binding.deposit.root())?;
        info!(
            id = %binding.id,
            path = %self.backend.locate(&binding.object_path),
            "removed object"
        );
        self.set_location(Location::Repository);
        self.inventory = None;
        self.pending = None;
        Ok(())
    }

    /// Version ids in order.
    pub fn get_versions(&self) -> Result<Vec<VersionId>> {
        Ok(self.active_inventory()?.version_ids())
    }

    /// Every version with its reconstructed state.
    pub fn get_all_versions(&self) -> Result<Vec<Version>> {
        let inventory = self.active_inventory()?;
        inventory
            .version_ids()
            .into_iter()
            .map(|v| inventory.version(v))
            .collect()
    }

    /// One version by its `vN` name.
    pub fn get_version(&self, version: &str) -> Result<Version> {
        let version = VersionId::parse(version)?;
        self.active_inventory()?.version(version)
    }

    /// The head version.
    pub fn get_latest_version(&self) -> Result<Version> {
        let inventory = self.active_inventory()?;
        inventory.version(inventory.head)
    }

    /// The inventory pinned in a version directory.
    pub fn get_inventory(&self, version: &str) -> Result<Inventory> {
        let version = VersionId::parse(version)?;
        let inventory = self.active_inventory()?;
        if !inventory.versions.contains_key(&version) {
            return Err(Error::version_not_found(&inventory.id, version.to_string()));
        }

        let dir = version.to_string();
        let active = self.active_root()?;
        match self.fallback_root()? {
            Some(fallback) if !active.exists(&join_key(&dir, INVENTORY_FILE))? => {
                read_inventory(fallback, &dir)
            }
            _ => read_inventory(active, &dir),
        }
    }

    /// The root inventory as stored.
    pub fn get_latest_inventory(&self) -> Result<Inventory> {
        read_inventory(self.active_root()?, "")
    }

    /// Location of a file given relative to the object root.
    pub fn resolve_file_path(&self, file_path: &str) -> Result<String> {
        let root = self.active_root()?;
        Ok(root.backend.locate(&root.key_for(file_path)))
    }

    /// A time-limited URL for a committed file, on backends that support it.
    pub fn presigned_url(&self, file_path: &str, ttl: Duration) -> Result<String> {
        let root = self.repository_root()?;
        root.backend.presigned_url(&root.key_for(file_path), ttl)
    }

    /// Compare two versions given as `vN` strings.
    pub fn diff_versions(&self, previous: &str, next: &str) -> Result<VersionDiff> {
        diff::diff_versions(self.active_inventory()?, previous, next)
    }

    /// Cross-check the stored inventory against the stored files.
    pub fn verify(&self) -> Result<VerificationReport> {
        let active = self.active_root()?;
        let inventory = read_object(active)?;
        verify::verify(&inventory, active, self.fallback_root()?)
    }

    /// Export committed content into an empty local directory.
    pub fn export(&self, target: &Path, version: ExportVersion) -> Result<usize> {
        let root = self.repository_root()?;
        let inventory = match &self.inventory {
            Some(inventory) => inventory.clone(),
            None => read_object(root)?,
        };
        export::export(&inventory, root, target, version)
    }
}

/// Load and check the object rooted at `root`.
fn read_object(root: ObjectRoot<'_>) -> Result<Inventory> {
    if !root.backend.is_tree(root.key)? {
        return Err(Error::not_an_object(
            root.locate(),
            "path does not exist or is not a directory",
        ));
    }
    if !root.exists(OBJECT_MARKER)? {
        return Err(Error::not_an_object(
            root.locate(),
            format!("no {} marker file", OBJECT_MARKER),
        ));
    }
    read_inventory(root, "")
}

/// Read `inventory.json` from `dir` under `root` and check it against its sidecar.
fn read_inventory(root: ObjectRoot<'_>, dir: &str) -> Result<Inventory> {
    let inventory_key = join_key(dir, INVENTORY_FILE);
    let bytes = root.read(&inventory_key)?.ok_or_else(|| {
        Error::not_an_object(root.locate(), format!("{} is missing", inventory_key))
    })?;
    let inventory = Inventory::from_json(&bytes)?;

    let sidecar_key = join_key(dir, &inventory.sidecar_name());
    let sidecar = root.read(&sidecar_key)?.ok_or_else(|| {
        Error::not_an_object(root.locate(), format!("{} is missing", sidecar_key))
    })?;
    let expected = inventory::parse_sidecar(&String::from_utf8_lossy(&sidecar))
        .ok_or_else(|| Error::not_an_object(root.locate(), format!("{} is malformed", sidecar_key)))?;
    if expected != inventory.digest_algorithm.hash_bytes(&bytes) {
        return Err(Error::not_an_object(
            root.locate(),
            format!("{} does not match {}", sidecar_key, inventory_key),
        ));
    }

    inventory.validate()?;
    Ok(inventory)
}

/// Write `inventory.json` and its sidecar into `dir` under `root`.
fn write_inventory(root: ObjectRoot<'_>, dir: &str, inventory: &Inventory) -> Result<()> {
    let bytes = inventory.to_json()?;
    let digest = inventory.digest_algorithm.hash_bytes(&bytes);
    root.write(&join_key(dir, INVENTORY_FILE), &bytes)?;
    root.write(
        &join_key(dir, &inventory.sidecar_name()),
        inventory::sidecar_contents(&digest).as_bytes(),
    )
}

/// Create the deposit directory, failing if another writer already holds it.
fn claim_deposit(id: &str, deposit: &Path) -> Result<()> {
    if let Some(parent) = deposit.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::create_dir(deposit) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(Error::DepositExists {
            id: id.to_string(),
            path: deposit.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn discard(deposit: &Path) -> Result<()> {
    match fs::remove_dir_all(deposit) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
