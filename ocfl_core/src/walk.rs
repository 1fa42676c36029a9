//! Filesystem walking and directory digesting.
//!
//! All traversals are iterative (driven by the `ignore` walker) so deep
//! trees never grow the call stack. Every walk disables ignore-file
//! filtering and includes hidden files: object content is stored verbatim.

use crate::error::{Error, Result};
use crate::hash::{Digest, DigestAlgorithm};
use ignore::{WalkBuilder, WalkState};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// A regular file found under a walked root, with its digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileDigest {
    /// Path relative to the walked root, `/`-separated.
    pub path: String,
    /// Digest of the file contents.
    pub hash: Digest,
}

fn walker(root: &Path, follow_links: bool) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false).follow_links(follow_links);
    builder
}

/// Iterate the regular files under `root`, yielding their absolute paths.
///
/// Directories are skipped, and so are symlinks. The order is stable for a
/// given tree but not sorted; callers needing determinism sort the output.
/// The iterator can be recreated at any time by calling this function again.
pub fn files(root: &Path) -> impl Iterator<Item = Result<PathBuf>> + use<> {
    regular_files(root, false)
}

/// Like [`files`], but symlinks are resolved and yielded under their own
/// path when they point at a regular file. A dangling link is an error.
pub fn content_files(root: &Path) -> impl Iterator<Item = Result<PathBuf>> + use<> {
    regular_files(root, true)
}

fn regular_files(
    root: &Path,
    follow_links: bool,
) -> impl Iterator<Item = Result<PathBuf>> + use<> {
    walker(root, follow_links).build().filter_map(move |entry| match entry {
        Ok(entry) => match entry.file_type() {
            Some(ft) if ft.is_file() => Some(Ok(entry.into_path())),
            Some(ft) if ft.is_symlink() && follow_links => Some(Err(dangling(entry.path()))),
            _ => None,
        },
        Err(e) => Some(Err(Error::from(e))),
    })
}

/// List the regular files under `root` as sorted `/`-separated relative keys.
pub fn relative_files(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for path in files(root) {
        let path = path?;
        keys.push(relative_key(root, &path)?);
    }
    keys.sort();
    Ok(keys)
}

/// A followed walk still reports a symlink only when its target is missing.
fn dangling(path: &Path) -> Error {
    Error::Io {
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("dangling symlink {}", path.display()),
        ),
    }
}

/// Recursively hash every regular file under `root`.
///
/// Symlinks are followed, so a linked file is digested by its target's
/// contents. Files are hashed in parallel across the walker's worker
/// threads; the result is sorted by path.
pub fn digest_tree(root: &Path, algorithm: DigestAlgorithm) -> Result<Vec<FileDigest>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let found: Mutex<Vec<FileDigest>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<Error>> = Mutex::new(None);

    let found_ref = &found;
    let failure_ref = &failure;
    walker(root, true).build_parallel().run(move || {
        Box::new(move |entry| {
            let result = entry.map_err(Error::from).and_then(|entry| {
                match entry.file_type() {
                    Some(ft) if ft.is_file() => {
                        let hash = algorithm.hash_file(entry.path())?;
                        let path = relative_key(root, entry.path())?;
                        Ok(Some(FileDigest { path, hash }))
                    }
                    Some(ft) if ft.is_symlink() => Err(dangling(entry.path())),
                    _ => Ok(None),
                }
            });
            match result {
                Ok(Some(digest)) => {
                    if let Ok(mut found) = found_ref.lock() {
                        found.push(digest);
                    }
                    WalkState::Continue
                }
                Ok(None) => WalkState::Continue,
                Err(e) => {
                    if let Ok(mut failure) = failure_ref.lock() {
                        failure.get_or_insert(e);
                    }
                    WalkState::Quit
                }
            }
        })
    });

    if let Some(e) = failure.into_inner().ok().flatten() {
        return Err(e);
    }
    let mut found = found
        .into_inner()
        .map_err(|_| Error::Io {
            source: std::io::Error::other("digest worker panicked"),
        })?;
    found.sort();
    debug!(root = %root.display(), files = found.len(), "digested tree");
    Ok(found)
}

/// Convert `path` beneath `root` into a `/`-separated relative key.
pub fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        Error::invalid_object_path(
            path.display().to_string(),
            format!("not beneath {}", root.display()),
        )
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::invalid_object_path(path.display().to_string(), "path is not valid UTF-8")
            })?),
            Component::CurDir => {}
            _ => {
                return Err(Error::invalid_object_path(
                    path.display().to_string(),
                    "unexpected path component",
                ));
            }
        }
    }
    Ok(parts.join("/"))
}

/// Join a `/`-separated key onto a local directory.
pub fn key_to_path(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Copy every regular file under `src` into `dest`, creating directories as needed.
///
/// Symlinked files are copied as the file they point to.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;
    for path in content_files(src) {
        let path = path?;
        let key = relative_key(src, &path)?;
        let target = key_to_path(dest, &key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&path, &target)?;
        copied += 1;
    }
    Ok(copied)
}

/// Remove empty directories beneath `root`, deepest first, including `root` itself.
///
/// Returns the number of directories removed.
pub fn prune_empty_dirs(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut dirs: Vec<PathBuf> = walker(root, false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_dir()))
        .map(|entry| entry.into_path())
        .collect();
    // Deepest paths first so children are removed before their parents.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0;
    for dir in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
            removed += 1;
        }
    }
    Ok(removed)
}
