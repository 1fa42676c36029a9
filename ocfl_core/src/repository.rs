//! Repository bootstrap and object enumeration.

use crate::backend::Backend;
use crate::config::ObjectOptions;
use crate::error::{Error, Result};
use crate::inventory::{INVENTORY_FILE, Inventory};
use crate::layout::{
    self, LAYOUT_FILE, OBJECT_MARKER, REPOSITORY_MARKER, REPOSITORY_MARKER_CONTENT,
    RepositoryLayout, join_key,
};
use crate::object::{ObjectTarget, OcflObject};
use crate::version::VersionId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// A committed object found by [`Repository::find_objects`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub id: String,
    pub path: String,
    pub head: VersionId,
}

/// An OCFL storage root on some backend.
#[derive(Debug, Clone)]
pub struct Repository {
    backend: Arc<dyn Backend>,
    options: ObjectOptions,
}

impl Repository {
    /// Initialise a new repository: write the root marker and layout file.
    pub fn create(backend: Arc<dyn Backend>, options: ObjectOptions) -> Result<Self> {
        if Self::is_repository(backend.as_ref())? {
            return Err(Error::invalid_repository(
                backend.locate(""),
                "a repository already exists here",
            ));
        }
        backend.write_bytes(REPOSITORY_MARKER, REPOSITORY_MARKER_CONTENT.as_bytes())?;
        backend.write_json(LAYOUT_FILE, &RepositoryLayout::for_mapping(options.id_mapping))?;
        info!(root = %backend.locate(""), layout = options.id_mapping.extension(), "created repository");
        Ok(Self { backend, options })
    }

    /// Open an existing repository. The layout file, when present, decides
    /// the id mapping.
    pub fn open(backend: Arc<dyn Backend>, mut options: ObjectOptions) -> Result<Self> {
        if !Self::is_repository(backend.as_ref())? {
            return Err(Error::invalid_repository(
                backend.locate(""),
                format!("no {} marker file", REPOSITORY_MARKER),
            ));
        }
        if let Some(layout) = backend.read_json::<RepositoryLayout>(LAYOUT_FILE)? {
            options.id_mapping = layout.mapping()?;
        }
        debug!(root = %backend.locate(""), "opened repository");
        Ok(Self { backend, options })
    }

    /// Whether the backend root carries the repository marker.
    pub fn is_repository(backend: &dyn Backend) -> Result<bool> {
        backend.exists(REPOSITORY_MARKER)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn options(&self) -> &ObjectOptions {
        &self.options
    }

    /// An object bound to `id`, loaded if it has been committed.
    pub fn object(&self, id: &str) -> Result<OcflObject> {
        self.bind(ObjectTarget::Id(id.to_string()))
    }

    /// An object bound to an explicit repository-relative path.
    pub fn object_at(&self, path: &str) -> Result<OcflObject> {
        self.bind(ObjectTarget::Path(path.to_string()))
    }

    fn bind(&self, target: ObjectTarget) -> Result<OcflObject> {
        let mut object = OcflObject::new(self.backend.clone(), self.options.clone());
        object.init(target)?;
        if object.is_object()? {
            object.load()?;
        }
        Ok(object)
    }

    /// Every committed object, ordered by path.
    ///
    /// Hidden top-level directories (such as a scratch area kept inside the
    /// root) are skipped, as are marker files nested inside another object.
    pub fn find_objects(&self) -> Result<Vec<ObjectSummary>> {
        let mut roots: BTreeSet<String> = BTreeSet::new();
        for key in self.backend.list("")? {
            if key.starts_with('.') {
                continue;
            }
            let root = match key.strip_suffix(OBJECT_MARKER) {
                Some("") => String::new(),
                Some(dir) if dir.ends_with('/') => dir.trim_end_matches('/').to_string(),
                _ => continue,
            };
            roots.insert(root);
        }

        let mut objects = Vec::new();
        let mut found: BTreeSet<String> = BTreeSet::new();
        for root in roots {
            // BTreeSet order puts parents before children
            if layout::ancestors(&root).iter().any(|a| found.contains(a)) {
                continue;
            }
            let Some(bytes) = self.backend.read_bytes(&join_key(&root, INVENTORY_FILE))? else {
                continue;
            };
            let inventory = Inventory::from_json(&bytes)?;
            objects.push(ObjectSummary {
                id: inventory.id,
                path: root.clone(),
                head: inventory.head,
            });
            found.insert(root);
        }
        debug!(count = objects.len(), "found objects");
        Ok(objects)
    }
}
